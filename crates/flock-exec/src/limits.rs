//! POSIX rlimit-based resource limits for worker processes.
//!
//! On Unix the limits are applied inside a `pre_exec` hook, i.e. in the child
//! after `fork()` and right before `execve()`, so a worker never runs without
//! them. Other platforms log a warning and treat the request as a no-op.
use tokio::process::Command;

/// Declarative rlimits for a worker process.
///
/// `None` means "inherit from the scheduler process".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RlimitConfig {
    /// `RLIMIT_NOFILE`. Scripts that open many RPC connections need headroom here.
    pub max_open_files: Option<u64>,

    /// `RLIMIT_FSIZE`, in bytes. Exceeding it typically raises `SIGXFSZ`.
    pub max_file_size_bytes: Option<u64>,

    /// `RLIMIT_CORE = 0`. Keeps crashed workers (and the secrets in their memory) off disk.
    pub disable_core_dumps: bool,
}

impl RlimitConfig {
    /// Returns `true` if no explicit limits are configured.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max_open_files.is_none()
            && !self.disable_core_dumps
            && self.max_file_size_bytes.is_none()
    }
}

/// Attach `config` to `cmd`.
pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
    if config.is_empty() {
        return;
    }

    platform::attach_rlimits(cmd, config);
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use unix_impl as platform;
    } else {
        mod platform {
            use super::RlimitConfig;
            use tokio::process::Command;

            pub fn attach_rlimits(_cmd: &mut Command, config: &RlimitConfig) {
                tracing::warn!(
                    target: "flock.exec.limits",
                    ?config,
                    "rlimit-based process limits requested on a non-Unix OS; limits will be ignored"
                );
            }
        }
    }
}

#[cfg(unix)]
mod unix_impl {
    use super::RlimitConfig;

    use std::io;

    use tokio::process::Command;

    // The resource parameter type differs between libc flavours, so let the
    // call site infer it.
    macro_rules! apply_rlimit {
        ($resource:expr, $value:expr) => {{
            let rlim = libc::rlimit {
                rlim_cur: $value as libc::rlim_t,
                rlim_max: $value as libc::rlim_t,
            };
            if unsafe { libc::setrlimit($resource, &rlim) } != 0 {
                return Err(io::Error::last_os_error());
            }
        }};
    }

    pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
        let max_file_size_bytes = config.max_file_size_bytes;
        let max_open_files = config.max_open_files;
        let disable_core_dumps = config.disable_core_dumps;

        let hook = move || {
            if let Some(nofile) = max_open_files {
                apply_rlimit!(libc::RLIMIT_NOFILE, nofile);
            }
            if let Some(fsize) = max_file_size_bytes {
                apply_rlimit!(libc::RLIMIT_FSIZE, fsize);
            }
            if disable_core_dumps {
                apply_rlimit!(libc::RLIMIT_CORE, 0u64);
            }
            Ok(())
        };

        // SAFETY: the hook only calls async-signal-safe `setrlimit`.
        unsafe {
            cmd.pre_exec(hook);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_noop() {
        let config = RlimitConfig::default();
        assert!(config.is_empty());

        let mut cmd = Command::new("sh");
        attach_rlimits(&mut cmd, &config);
    }

    #[test]
    fn any_field_makes_config_non_empty() {
        let config = RlimitConfig {
            disable_core_dumps: true,
            ..Default::default()
        };
        assert!(!config.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn limits_are_visible_inside_the_child() {
        let config = RlimitConfig {
            max_open_files: Some(256),
            max_file_size_bytes: None,
            disable_core_dumps: true,
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("ulimit -n; ulimit -c");
        attach_rlimits(&mut cmd, &config);

        let out = cmd.output().await.unwrap();
        let stdout = String::from_utf8_lossy(&out.stdout);
        let lines: Vec<&str> = stdout.lines().collect();
        assert_eq!(lines, vec!["256", "0"]);
    }
}
