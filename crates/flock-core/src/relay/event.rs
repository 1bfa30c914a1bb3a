use std::time::{SystemTime, UNIX_EPOCH};

use flock_model::{LogLevel, Payload, Progress, TaskErrorRecord, TaskId, TaskStatus};
use serde::Serialize;

/// Where a `taskLog` line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LogSource {
    /// A `log` protocol message.
    Worker,
    /// A stdout line that was not a protocol message.
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TaskEventKind {
    Created {
        script: String,
        wallet_count: usize,
    },
    Started {
        pid: Option<u32>,
    },
    /// `percent` is the task's progress after clamping, not the raw report.
    Progress(Progress),
    Result {
        payload: Payload,
    },
    Error(TaskErrorRecord),
    Log {
        level: LogLevel,
        message: String,
        source: LogSource,
        /// Unix milliseconds reported by the worker, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        worker_timestamp: Option<u64>,
    },
    /// Completed or Failed.
    Finished {
        status: TaskStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<Payload>,
    },
    Stopped,
}

/// One scheduler event for one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: TaskId,
    /// Unix milliseconds.
    pub timestamp: u64,
    #[serde(flatten)]
    pub kind: TaskEventKind,
}

impl TaskEvent {
    pub fn new(task_id: TaskId, kind: TaskEventKind) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            task_id,
            timestamp,
            kind,
        }
    }

    /// External event name, e.g. `taskProgress`.
    pub fn name(&self) -> &'static str {
        match self.kind {
            TaskEventKind::Created { .. } => "taskCreated",
            TaskEventKind::Started { .. } => "taskStarted",
            TaskEventKind::Progress(_) => "taskProgress",
            TaskEventKind::Result { .. } => "taskResult",
            TaskEventKind::Error(_) => "taskError",
            TaskEventKind::Log { .. } => "taskLog",
            TaskEventKind::Finished { .. } => "taskFinished",
            TaskEventKind::Stopped => "taskStopped",
        }
    }

    /// Last event a task will ever produce.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            TaskEventKind::Finished { .. } | TaskEventKind::Stopped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_event_surface() {
        let id = TaskId::from("task-1");
        assert_eq!(
            TaskEvent::new(id.clone(), TaskEventKind::Stopped).name(),
            "taskStopped"
        );
        assert_eq!(
            TaskEvent::new(id, TaskEventKind::Started { pid: Some(7) }).name(),
            "taskStarted"
        );
    }

    #[test]
    fn serializes_flat_with_type_tag() {
        let ev = TaskEvent::new(
            TaskId::from("task-1"),
            TaskEventKind::Finished {
                status: TaskStatus::Completed,
                summary: None,
            },
        );
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["taskId"], "task-1");
        assert_eq!(json["type"], "finished");
        assert_eq!(json["status"], "completed");
        assert!(json.get("summary").is_none());
    }
}
