use std::time::SystemTime;

use flock_model::{
    Params, Payload, TaskErrorRecord, TaskId, TaskSnapshot, TaskStatus, WalletRef,
};
use tokio_util::sync::CancellationToken;

/// Highest progress a task can show before it completes.
const RUNNING_PROGRESS_CAP: u8 = 99;

/// Live handle on a running task's worker.
#[derive(Debug)]
pub(crate) struct ProcessHandle {
    pub pid: Option<u32>,
    /// Cancelled to ask the driver for a graceful stop.
    pub stop: CancellationToken,
}

/// Registry record of one task.
///
/// `process` is `Some` exactly while `status` is `Running`; `ended_at` is
/// `Some` exactly when `status` is terminal.
#[derive(Debug)]
pub(crate) struct TaskEntry {
    pub id: TaskId,
    pub script: String,
    pub params: Params,
    pub wallets: Vec<WalletRef>,
    pub status: TaskStatus,
    pub progress: u8,
    pub results: Vec<Payload>,
    pub errors: Vec<TaskErrorRecord>,
    pub summary: Option<Payload>,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub ended_at: Option<SystemTime>,
    pub process: Option<ProcessHandle>,
    pub stop_requested: bool,
}

impl TaskEntry {
    pub fn new(id: TaskId, script: String, params: Params, wallets: Vec<WalletRef>) -> Self {
        Self {
            id,
            script,
            params,
            wallets,
            status: TaskStatus::Pending,
            progress: 0,
            results: Vec::new(),
            errors: Vec::new(),
            summary: None,
            created_at: SystemTime::now(),
            started_at: None,
            ended_at: None,
            process: None,
            stop_requested: false,
        }
    }

    pub fn start(&mut self, process: ProcessHandle) {
        self.status = TaskStatus::Running;
        self.started_at = Some(SystemTime::now());
        self.process = Some(process);
    }

    /// Move into a terminal state and release the process handle.
    pub fn finish(&mut self, status: TaskStatus) {
        debug_assert!(status.is_terminal());
        if status == TaskStatus::Completed {
            self.progress = 100;
        }
        self.status = status;
        self.ended_at = Some(SystemTime::now());
        self.process = None;
    }

    /// Apply a worker report; returns the resulting task progress.
    pub fn report_progress(&mut self, percent: u8) -> u8 {
        if self.status == TaskStatus::Running {
            self.progress = self.progress.max(percent.min(RUNNING_PROGRESS_CAP));
        }
        self.progress
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            script: self.script.clone(),
            status: self.status,
            progress: self.progress,
            wallet_count: self.wallets.len(),
            results: self.results.clone(),
            errors: self.errors.clone(),
            summary: self.summary.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            pid: self.process.as_ref().and_then(|p| p.pid),
        }
    }
}
