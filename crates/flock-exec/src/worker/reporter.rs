use std::time::{SystemTime, UNIX_EPOCH};

use flock_model::{ErrorKind, LogLevel, Payload, Progress, WorkerMessage};
use tokio::sync::mpsc;

/// Sends progress, results, errors and logs back to the scheduler.
///
/// Never blocks; messages sent after the worker has written its terminal
/// message are dropped.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl Reporter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self { tx }
    }

    pub fn progress(&self, progress: Progress) {
        self.emit(WorkerMessage::Progress(progress));
    }

    /// Progress from absolute counts, e.g. wallets done out of wallets total.
    pub fn progress_counts(&self, current: u64, total: u64, message: impl Into<String>) {
        self.progress(Progress::from_counts(current, total).with_message(message));
    }

    pub fn result(&self, payload: Payload) {
        self.emit(WorkerMessage::Result { payload });
    }

    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) {
        self.emit(WorkerMessage::Error {
            kind,
            message: message.into(),
        });
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_millis() as u64);
        self.emit(WorkerMessage::Log {
            level,
            message: message.into(),
            timestamp,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub(crate) fn emit(&self, msg: WorkerMessage) {
        let _ = self.tx.send(msg);
    }
}
