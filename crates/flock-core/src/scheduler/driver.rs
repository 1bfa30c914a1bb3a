use std::sync::Arc;

use flock_exec::{WorkerOutput, WorkerProcess};
use flock_model::{SchedulerMessage, TaskId};
use tokio::{
    sync::mpsc,
    time::{Instant, sleep, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::Inner;

/// Everything a driver owns for one running task.
pub(crate) struct Job {
    pub id: TaskId,
    pub process: WorkerProcess,
    pub output: mpsc::UnboundedReceiver<WorkerOutput>,
    pub stop: CancellationToken,
    pub execute: SchedulerMessage,
}

/// Supervise one worker process from `execute` to reap.
///
/// Output is applied to the registry as it arrives. A stop request sends
/// `stop` and arms the grace timer; a terminal message settles the task at
/// once and arms the same timer for reaping. Whatever is still alive when
/// the timer fires is killed.
///
/// Writes to stdin are queued, never awaited, so a worker that stops reading
/// cannot hold the loop away from the stop token or the kill timer.
pub(crate) async fn drive(inner: Arc<Inner>, job: Job) {
    let Job {
        id,
        mut process,
        mut output,
        stop,
        execute,
    } = job;
    let pid = process.id();
    let grace = inner.config.stop_grace;

    if let Err(e) = process.send(&execute) {
        inner.process_error(&id, format!("failed to deliver execute: {e}"));
    }
    drop(execute);

    let mut stop_sent = false;
    let mut settled = false;
    let mut output_open = true;
    let mut deadline: Option<Instant> = None;

    let exit = loop {
        tokio::select! {
            _ = stop.cancelled(), if !stop_sent && !settled => {
                stop_sent = true;
                if let Err(e) = process.send(&SchedulerMessage::Stop) {
                    debug!(target: "flock.core.scheduler", task = %id, error = %e, "stop not delivered");
                }
                deadline.get_or_insert_with(|| Instant::now() + grace);
            }
            line = output.recv(), if output_open => match line {
                Some(line) => {
                    if !settled && inner.apply_output(&id, line) {
                        settled = true;
                        process.close_stdin();
                        deadline.get_or_insert_with(|| Instant::now() + grace);
                    }
                }
                None => output_open = false,
            },
            status = process.wait() => break status,
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                warn!(target: "flock.core.scheduler", task = %id, pid, "worker outlived grace window; killing");
                if let Err(e) = process.kill().await {
                    warn!(target: "flock.core.scheduler", task = %id, pid, error = %e, "kill failed");
                }
                deadline = None;
            }
        }
    };

    match &exit {
        Ok(exit) => debug!(target: "flock.core.scheduler", task = %id, pid, %exit, "worker exited"),
        Err(e) => warn!(target: "flock.core.scheduler", task = %id, pid, error = %e, "wait failed"),
    }

    if output_open {
        let drain = sleep(inner.config.reap_drain);
        tokio::pin!(drain);
        loop {
            tokio::select! {
                line = output.recv() => match line {
                    Some(line) => {
                        if !settled && inner.apply_output(&id, line) {
                            settled = true;
                        }
                    }
                    None => break,
                },
                _ = &mut drain => {
                    debug!(target: "flock.core.scheduler", task = %id, "output still open after exit; abandoning");
                    break;
                }
            }
        }
    }

    if !settled {
        inner.apply_exit(&id, exit.map_err(|e| e.to_string()));
    }
    trace!(target: "flock.core.scheduler", task = %id, "driver done");
}
