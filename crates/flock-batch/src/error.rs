use thiserror::Error;

use crate::BatchSummary;

#[derive(Error, Debug)]
pub enum BatchError<R> {
    #[error("batch runner is already running")]
    AlreadyRunning,
    /// `stop()` was called; the summary covers work settled before that.
    #[error("batch cancelled after {} settled items", .summary.settled())]
    Cancelled { summary: Box<BatchSummary<R>> },
    /// `stop_on_error` tripped on the first item that exhausted its retries.
    #[error("item {id} failed: {message}")]
    ItemFailed {
        id: String,
        message: String,
        summary: Box<BatchSummary<R>>,
    },
}

impl<R> BatchError<R> {
    /// Partial summary of an aborted run.
    pub fn summary(&self) -> Option<&BatchSummary<R>> {
        match self {
            BatchError::AlreadyRunning => None,
            BatchError::Cancelled { summary } | BatchError::ItemFailed { summary, .. } => {
                Some(summary)
            }
        }
    }
}
