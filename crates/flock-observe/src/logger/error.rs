use thiserror::Error;

/// Failures of [`logger_init`](crate::logger_init).
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("unknown log format {0:?} (expected text, json or journald)")]
    InvalidFormat(String),
    /// Requested `journald` without the feature, or off Linux.
    #[error("journald output is unavailable in this build")]
    JournaldNotSupported,
    /// A global subscriber is already installed for this process.
    #[error("logger already initialized")]
    AlreadyInitialized,
    #[error("logger setup failed: {0}")]
    InitializationFailed(String),
    #[error("bad log filter {0:?}")]
    InvalidLogLevel(String),
}
