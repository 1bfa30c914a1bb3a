use std::time::Duration;

use flock_exec::WorkerCommand;
use tracing::warn;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 10;
pub const DEFAULT_CONCURRENCY: usize = 3;

/// How long a worker gets to exit after `stop` before it is killed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// How long to keep reading output after a worker exited.
pub const DEFAULT_REAP_DRAIN: Duration = Duration::from_millis(500);

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Max tasks in `Running` at once.
    ///
    /// This bounds tasks, not OS processes. A worker that has already sent
    /// `completed` or `failed` gives up its slot at once and may live on for
    /// up to `stop_grace` while it is reaped, so the number of live worker
    /// processes can briefly exceed the limit.
    pub concurrency_limit: usize,
    pub stop_grace: Duration,
    /// Upper bound on draining stdout/stderr once the process is gone;
    /// orphaned grandchildren may keep the pipes open forever.
    pub reap_drain: Duration,
    /// Command launched for every admitted task.
    pub worker: WorkerCommand,
}

impl SchedulerConfig {
    pub fn new(worker: WorkerCommand) -> Self {
        Self {
            worker,
            ..Self::default()
        }
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_reap_drain(mut self, drain: Duration) -> Self {
        self.reap_drain = drain;
        self
    }

    /// `concurrency_limit` forced into the accepted range.
    pub(crate) fn effective_limit(&self) -> usize {
        let limit = self
            .concurrency_limit
            .clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);
        if limit != self.concurrency_limit {
            warn!(
                target: "flock.core.scheduler",
                requested = self.concurrency_limit,
                limit,
                "concurrency limit clamped"
            );
        }
        limit
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY,
            stop_grace: DEFAULT_STOP_GRACE,
            reap_drain: DEFAULT_REAP_DRAIN,
            worker: WorkerCommand::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.concurrency_limit, 3);
        assert_eq!(cfg.stop_grace, Duration::from_secs(5));
    }

    #[test]
    fn out_of_range_limit_is_clamped() {
        let worker = WorkerCommand::new("/bin/true");
        assert_eq!(
            SchedulerConfig::new(worker.clone())
                .with_concurrency_limit(0)
                .effective_limit(),
            1
        );
        assert_eq!(
            SchedulerConfig::new(worker)
                .with_concurrency_limit(64)
                .effective_limit(),
            10
        );
    }
}
