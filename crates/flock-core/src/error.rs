use thiserror::Error;

use crate::config::{MAX_CONCURRENCY, MIN_CONCURRENCY};

/// Submission input was rejected; no task was created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// Name of the offending submission field (`scriptRef`, `wallets`).
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("concurrency limit {0} outside {min}..={max}", min = MIN_CONCURRENCY, max = MAX_CONCURRENCY)]
    InvalidConcurrency(usize),
    #[error("scheduler is shut down")]
    ShutDown,
}

impl SchedulerError {
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            SchedulerError::Validation(v) => Some(v),
            _ => None,
        }
    }
}
