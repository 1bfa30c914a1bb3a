use std::{collections::HashMap, time::Duration};

/// Outcome of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Success,
    Failed,
}

/// Final failure of an item after its retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub message: String,
    /// Retries consumed before giving up (`max_retries` unless cancelled early).
    pub retries: u32,
    /// The run was already cancelled when the item gave up.
    pub cancelled: bool,
}

/// Emitted after every settled item.
///
/// `total` is recomputed from live counts (`queued + active + settled`), so it
/// grows if items are added while the run is in progress.
#[derive(Debug, Clone)]
pub struct BatchProgress<R> {
    pub current: usize,
    pub total: usize,
    pub item_id: String,
    pub status: ItemStatus,
    pub result: Option<R>,
    pub error: Option<String>,
}

/// Aggregated result of a run, keyed by item id.
#[derive(Debug, Clone)]
pub struct BatchSummary<R> {
    /// The queue was fully drained without an abort.
    pub success: bool,
    pub total_tasks: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub duration: Duration,
    pub results: HashMap<String, R>,
    pub errors: HashMap<String, ItemError>,
}

impl<R> BatchSummary<R> {
    pub fn settled(&self) -> usize {
        self.success_count + self.error_count
    }

    pub fn duration_ms(&self) -> u128 {
        self.duration.as_millis()
    }
}

/// Point-in-time view of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchStatus {
    pub running: bool,
    pub paused: bool,
    pub queued: usize,
    pub active: usize,
    pub success: usize,
    pub errors: usize,
}
