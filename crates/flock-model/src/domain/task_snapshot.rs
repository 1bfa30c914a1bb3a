use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use super::time_serde;
use crate::{Payload, TaskErrorRecord, TaskId, TaskStatus};

/// Read-only view of a task.
///
/// Wallets and params are intentionally absent: snapshots travel to UIs and
/// logs, and wallets may carry secret material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub script: String,
    pub status: TaskStatus,
    /// 0..=100; reaches 100 only once the task is `Completed`.
    pub progress: u8,
    pub wallet_count: usize,
    pub results: Vec<Payload>,
    pub errors: Vec<TaskErrorRecord>,
    /// Final payload from the worker's `completed` message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Payload>,
    #[serde(with = "time_serde")]
    pub created_at: SystemTime,
    #[serde(default, with = "time_serde::option")]
    pub started_at: Option<SystemTime>,
    #[serde(default, with = "time_serde::option")]
    pub ended_at: Option<SystemTime>,
    /// OS process id while the task is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl TaskSnapshot {
    /// Time spent running: `ended_at` (or now) minus `started_at`.
    pub fn duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let end = self.ended_at.unwrap_or_else(SystemTime::now);
        Some(end.duration_since(started).unwrap_or_default())
    }
}

/// Number of tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
}

impl TaskCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Stopped => self.stopped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.stopped
    }
}
