use flock_core::{TaskEvent, TaskEventKind};
use flock_model::{LogLevel, TaskStatus};
use tracing::{debug, error, info, trace, warn};

#[inline]
pub fn message_for(kind: &TaskEventKind) -> &'static str {
    match kind {
        // lifecycle
        TaskEventKind::Created { .. } => "task submitted",
        TaskEventKind::Started { .. } => "task started (worker spawned)",
        TaskEventKind::Stopped => "task stopped",
        TaskEventKind::Finished {
            status: TaskStatus::Completed,
            ..
        } => "task completed",
        TaskEventKind::Finished { .. } => "task failed",

        // worker reports
        TaskEventKind::Progress(_) => "task progress",
        TaskEventKind::Result { .. } => "task result",
        TaskEventKind::Error(_) => "task error (non-fatal)",
        TaskEventKind::Log { .. } => "worker log",
    }
}

#[inline]
pub fn log_event(e: &TaskEvent) {
    let msg = message_for(&e.kind);
    let task = e.task_id.as_str();

    match &e.kind {
        TaskEventKind::Created {
            script,
            wallet_count,
        } => info!(target: "flock.task", task, script = %script, wallets = wallet_count, "{msg}"),
        TaskEventKind::Started { pid } => info!(target: "flock.task", task, pid, "{msg}"),
        TaskEventKind::Stopped => info!(target: "flock.task", task, "{msg}"),
        TaskEventKind::Finished { status, .. } => {
            if *status == TaskStatus::Completed {
                info!(target: "flock.task", task, "{msg}")
            } else {
                error!(target: "flock.task", task, status = %status, "{msg}")
            }
        }

        TaskEventKind::Progress(p) => trace!(
            target: "flock.task",
            task,
            percent = p.percent,
            current = p.current,
            total = p.total,
            "{msg}"
        ),
        TaskEventKind::Result { .. } => debug!(target: "flock.task", task, "{msg}"),
        TaskEventKind::Error(rec) => {
            warn!(target: "flock.task", task, kind = %rec.kind, reason = %rec.message, "{msg}")
        }
        TaskEventKind::Log {
            level,
            message,
            source,
            ..
        } => {
            match level {
                LogLevel::Trace => trace!(target: "flock.task", task, source = ?source, "{message}"),
                LogLevel::Debug => debug!(target: "flock.task", task, source = ?source, "{message}"),
                LogLevel::Info => info!(target: "flock.task", task, source = ?source, "{message}"),
                LogLevel::Warn => warn!(target: "flock.task", task, source = ?source, "{message}"),
                LogLevel::Error => error!(target: "flock.task", task, source = ?source, "{message}"),
            }
        }
    }
}
