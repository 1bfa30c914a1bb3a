use crate::logger::format::LoggerFormat;

/// Stream the fmt layer writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogTarget {
    #[default]
    Stdout,
    /// Required inside worker processes: their stdout carries the protocol.
    Stderr,
}

impl LogTarget {
    fn is_tty(self) -> bool {
        match self {
            LogTarget::Stdout => atty::is(atty::Stream::Stdout),
            LogTarget::Stderr => atty::is(atty::Stream::Stderr),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
    pub target: LogTarget,
}

impl LoggerConfig {
    /// Defaults for a worker process: text on stderr.
    pub fn worker() -> Self {
        Self {
            use_color: cfg!(test) || LogTarget::Stderr.is_tty(),
            target: LogTarget::Stderr,
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: LoggerFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        let use_color = cfg!(test) || LogTarget::Stdout.is_tty();
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color,
            target: LogTarget::Stdout,
        }
    }
}
