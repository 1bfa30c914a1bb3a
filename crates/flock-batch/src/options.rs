use std::{fmt, sync::Arc, time::Duration};

use crate::BatchProgress;

/// Progress callback, invoked once per settled item.
pub type ProgressFn<R> = Arc<dyn Fn(&BatchProgress<R>) + Send + Sync>;

/// Settings for one [`crate::BatchRunner::start`] call.
pub struct BatchOptions<R> {
    /// Maximum in-flight task function invocations. `0` is treated as `1`.
    pub concurrency: usize,
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    /// Base backoff; attempt `n` waits `retry_delay * (n + 1)`.
    pub retry_delay: Duration,
    /// Abort the whole run on the first item that exhausts its retries.
    pub stop_on_error: bool,
    pub on_progress: Option<ProgressFn<R>>,
}

impl<R> BatchOptions<R> {
    pub fn new() -> Self {
        Self {
            concurrency: 3,
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            stop_on_error: false,
            on_progress: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    pub fn with_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&BatchProgress<R>) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub(crate) fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt.saturating_add(1))
    }
}

impl<R> Default for BatchOptions<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for BatchOptions<R> {
    fn clone(&self) -> Self {
        Self {
            concurrency: self.concurrency,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            stop_on_error: self.stop_on_error,
            on_progress: self.on_progress.clone(),
        }
    }
}

impl<R> fmt::Debug for BatchOptions<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("stop_on_error", &self.stop_on_error)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}
