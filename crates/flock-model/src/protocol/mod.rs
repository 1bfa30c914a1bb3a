//! Worker process protocol.
//!
//! One JSON object per line. The scheduler writes [`SchedulerMessage`]s to the
//! worker's stdin; the worker writes [`WorkerMessage`]s to its stdout. The
//! `type` field carries the variant tag.

mod codec;
pub use codec::{ProtocolError, decode_line, encode_line};

use serde::{Deserialize, Serialize};

use crate::{ErrorKind, LogLevel, Params, Payload, Progress, WalletRef};

/// Scheduler -> worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SchedulerMessage {
    /// Sent exactly once, right after spawn.
    Execute {
        script: String,
        #[serde(default)]
        params: Params,
        wallets: Vec<WalletRef>,
    },
    /// Sent at most once; asks the worker to wind down.
    Stop,
}

/// Worker -> scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    Progress(Progress),
    /// Appended to the task's result list.
    Result { payload: Payload },
    /// Non-fatal; appended to the task's error list.
    Error {
        #[serde(default = "default_error_kind")]
        kind: ErrorKind,
        message: String,
    },
    /// Forwarded to observers, never stored.
    Log {
        #[serde(default)]
        level: LogLevel,
        message: String,
        /// Unix milliseconds as seen by the worker.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<Payload>,
    },
    Failed { message: String },
}

fn default_error_kind() -> ErrorKind {
    ErrorKind::Item
}

impl SchedulerMessage {
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        encode_line(self)
    }

    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        decode_line(line)
    }
}

impl WorkerMessage {
    /// `completed` and `failed` end the task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerMessage::Completed { .. } | WorkerMessage::Failed { .. }
        )
    }

    /// Short tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::Progress(_) => "progress",
            WorkerMessage::Result { .. } => "result",
            WorkerMessage::Error { .. } => "error",
            WorkerMessage::Log { .. } => "log",
            WorkerMessage::Completed { .. } => "completed",
            WorkerMessage::Failed { .. } => "failed",
        }
    }

    pub fn to_line(&self) -> Result<String, ProtocolError> {
        encode_line(self)
    }

    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        decode_line(line)
    }
}
