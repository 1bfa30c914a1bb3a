use std::{fmt, process::ExitStatus};

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    /// Terminating signal (Unix only).
    pub signal: Option<i32>,
}

impl WorkerExit {
    /// Exit code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for WorkerExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: signal_of(&status),
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        fn signal_of(status: &ExitStatus) -> Option<i32> {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        }
    } else {
        fn signal_of(_status: &ExitStatus) -> Option<i32> {
            None
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code: {code}"),
            (None, Some(signal)) => write!(f, "terminated by signal {signal}"),
            (None, None) => f.write_str("terminated abnormally"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefers_exit_code() {
        let exit = WorkerExit {
            code: Some(2),
            signal: None,
        };
        assert_eq!(exit.to_string(), "exit code: 2");
        assert!(!exit.success());

        let killed = WorkerExit {
            code: None,
            signal: Some(9),
        };
        assert_eq!(killed.to_string(), "terminated by signal 9");
    }
}
