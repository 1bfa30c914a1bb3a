//! Bounded-concurrency batch executor.
//!
//! A [`BatchRunner`] takes a queue of per-wallet items and an async task
//! function, then drains the queue with a concurrency ceiling, linear-backoff
//! retries, cooperative pause/resume and cancellation.

mod error;
pub use error::BatchError;

mod item;
pub use item::{BatchItem, ItemContext, TaskFn, WalletSubJob};

mod options;
pub use options::{BatchOptions, ProgressFn};

mod summary;
pub use summary::{BatchProgress, BatchStatus, BatchSummary, ItemError, ItemStatus};

mod runner;
pub use runner::BatchRunner;

pub mod prelude {
    pub use crate::{BatchError, BatchItem, BatchOptions, BatchRunner, BatchSummary, ItemContext};
}
