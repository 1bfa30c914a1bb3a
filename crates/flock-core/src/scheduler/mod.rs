//! Task admission and lifecycle.
//!
//! All task state lives in one registry behind a mutex. Every transition
//! and the event that announces it happen under that lock, so observers see
//! each task's events in the order its transitions happened.

mod driver;

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime},
};

use flock_exec::{WorkerExit, WorkerOutput, WorkerProcess};
use flock_model::{
    ErrorKind, LogLevel, Params, ScriptRef, SchedulerMessage, TaskCounts, TaskErrorRecord,
    TaskId, TaskPage, TaskQuery, TaskSnapshot, TaskStatus, WalletRef, WorkerMessage,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::{MAX_CONCURRENCY, MIN_CONCURRENCY, SchedulerConfig},
    error::{SchedulerError, ValidationError},
    relay::{EventRelay, LogSource, Subscribe, Subscription, TaskEvent, TaskEventKind},
    state::{ProcessHandle, TaskEntry, TaskRegistry},
};

/// Handle on a running scheduler; cheap to clone.
///
/// Every method must be called from within a Tokio runtime: admission spawns
/// worker processes and their drivers.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    state: Mutex<State>,
    relay: EventRelay,
    config: SchedulerConfig,
    drivers: TaskTracker,
}

struct State {
    registry: TaskRegistry,
    limit: usize,
    shut_down: bool,
}

impl TaskScheduler {
    /// Build a scheduler that launches `config.worker` for every task.
    pub fn start(config: SchedulerConfig) -> Self {
        let limit = config.effective_limit();
        info!(
            target: "flock.core.scheduler",
            limit,
            worker = %config.worker.program,
            "scheduler started"
        );
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    registry: TaskRegistry::new(),
                    limit,
                    shut_down: false,
                }),
                relay: EventRelay::new(),
                config,
                drivers: TaskTracker::new(),
            }),
        }
    }

    pub fn relay(&self) -> &EventRelay {
        &self.inner.relay
    }

    /// Shorthand for `relay().subscribe(..)`.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscribe>) -> Subscription {
        self.inner.relay.subscribe(subscriber)
    }

    /// Queue a job and return its id without waiting for it to run.
    #[instrument(level = "debug", target = "flock.core.scheduler", skip_all, fields(wallets = wallets.len()))]
    pub fn submit(
        &self,
        script: impl Into<ScriptRef>,
        params: Params,
        wallets: Vec<WalletRef>,
    ) -> Result<TaskId, SchedulerError> {
        let script = script.into();
        if script.trim().is_empty() {
            return Err(ValidationError::new("scriptRef", "script reference is required").into());
        }
        if wallets.is_empty() {
            return Err(ValidationError::new("wallets", "at least one wallet is required").into());
        }

        let mut state = self.inner.lock();
        if state.shut_down {
            return Err(SchedulerError::ShutDown);
        }

        let id = TaskId::generate();
        let wallet_count = wallets.len();
        state
            .registry
            .insert(TaskEntry::new(id.clone(), script.clone(), params, wallets));
        self.inner.emit(
            &id,
            TaskEventKind::Created {
                script,
                wallet_count,
            },
        );
        debug!(target: "flock.core.scheduler", task = %id, "task submitted");

        self.inner.admit(&mut state);
        Ok(id)
    }

    /// Stop a task. `false` if it does not exist or already ended.
    ///
    /// Pending tasks end immediately. Running tasks get a `stop` message and
    /// are killed if they outlive the grace window.
    pub fn stop(&self, id: &TaskId) -> bool {
        let mut state = self.inner.lock();
        self.inner.stop_locked(&mut state, id)
    }

    pub fn get_status(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.inner.lock().registry.get(id).map(TaskEntry::snapshot)
    }

    /// Every task, in submission order.
    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.inner.lock().registry.snapshots()
    }

    pub fn query(&self, query: &TaskQuery) -> TaskPage<TaskSnapshot> {
        self.inner.lock().registry.query(query)
    }

    pub fn counts(&self) -> TaskCounts {
        self.inner.lock().registry.counts()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.inner.lock().limit
    }

    /// Change the ceiling and admit as many Pending tasks as now fit.
    pub fn set_concurrency_limit(&self, limit: usize) -> Result<(), SchedulerError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&limit) {
            return Err(SchedulerError::InvalidConcurrency(limit));
        }
        let mut state = self.inner.lock();
        let previous = std::mem::replace(&mut state.limit, limit);
        info!(target: "flock.core.scheduler", previous, limit, "concurrency limit changed");
        while self.inner.admit(&mut state) {}
        Ok(())
    }

    /// Drop finished tasks that ended at least `older_than` ago.
    pub fn cleanup(&self, older_than: Duration) -> usize {
        let now = SystemTime::now();
        let cutoff = now.checked_sub(older_than).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut state = self.inner.lock();
        let removed = state.registry.prune_finished(cutoff);
        if removed > 0 {
            debug!(
                target: "flock.core.scheduler",
                removed,
                remaining = state.registry.len(),
                "cleanup"
            );
        }
        removed
    }

    /// Refuse new work, stop every task and wait for all workers to be reaped.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.lock();
            if !state.shut_down {
                state.shut_down = true;
                info!(target: "flock.core.scheduler", "scheduler shutting down");
            }
            for id in state.registry.active_ids() {
                self.inner.stop_locked(&mut state, &id);
            }
        }
        self.inner.drivers.close();
        self.inner.drivers.wait().await;
        info!(target: "flock.core.scheduler", "scheduler shut down");
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("TaskScheduler")
            .field("limit", &state.limit)
            .field("tasks", &state.registry.len())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, id: &TaskId, kind: TaskEventKind) {
        self.relay.emit(TaskEvent::new(id.clone(), kind));
    }

    fn record_error(&self, entry: &mut TaskEntry, kind: ErrorKind, message: impl Into<String>) {
        let record = TaskErrorRecord::new(kind, message);
        entry.errors.push(record.clone());
        self.emit(&entry.id, TaskEventKind::Error(record));
    }

    /// Promote the oldest Pending task if a slot is free.
    ///
    /// A task whose worker cannot be launched fails on the spot; that frees
    /// nothing but still counts as a terminal event, so the next candidate
    /// is tried. Returns whether a worker was started.
    ///
    /// Only Running tasks count against the limit; workers still being
    /// reaped after a terminal message do not.
    fn admit(self: &Arc<Self>, state: &mut State) -> bool {
        loop {
            if state.shut_down || state.registry.running_count() >= state.limit {
                return false;
            }
            let Some(id) = state.registry.first_pending() else {
                return false;
            };
            let Some(entry) = state.registry.get_mut(&id) else {
                return false;
            };

            match WorkerProcess::spawn(&self.config.worker) {
                Ok((process, output)) => {
                    let stop = CancellationToken::new();
                    let pid = process.id();
                    entry.start(ProcessHandle {
                        pid,
                        stop: stop.clone(),
                    });
                    self.emit(&id, TaskEventKind::Started { pid });
                    info!(target: "flock.core.scheduler", task = %id, pid, script = %entry.script, "task started");

                    let execute = SchedulerMessage::Execute {
                        script: entry.script.clone(),
                        params: entry.params.clone(),
                        wallets: entry.wallets.clone(),
                    };
                    self.drivers.spawn(driver::drive(
                        Arc::clone(self),
                        driver::Job {
                            id,
                            process,
                            output,
                            stop,
                            execute,
                        },
                    ));
                    return true;
                }
                Err(e) => {
                    warn!(target: "flock.core.scheduler", task = %id, error = %e, "worker launch failed");
                    let now = SystemTime::now();
                    entry.started_at = Some(now);
                    self.record_error(entry, ErrorKind::Process, e.to_string());
                    self.finish(entry, TaskStatus::Failed);
                }
            }
        }
    }

    fn stop_locked(self: &Arc<Self>, state: &mut State, id: &TaskId) -> bool {
        let Some(entry) = state.registry.get_mut(id) else {
            return false;
        };
        match entry.status {
            TaskStatus::Pending => {
                entry.stop_requested = true;
                self.finish(entry, TaskStatus::Stopped);
                self.admit(state);
                true
            }
            TaskStatus::Running => {
                if !entry.stop_requested {
                    entry.stop_requested = true;
                    debug!(target: "flock.core.scheduler", task = %id, "stop requested");
                    if let Some(process) = &entry.process {
                        process.stop.cancel();
                    }
                }
                true
            }
            _ => false,
        }
    }

    /// Terminal transition plus its event. Does not re-run admission.
    fn finish(&self, entry: &mut TaskEntry, status: TaskStatus) {
        entry.finish(status);
        let kind = match status {
            TaskStatus::Stopped => TaskEventKind::Stopped,
            _ => TaskEventKind::Finished {
                status,
                summary: entry.summary.clone(),
            },
        };
        self.emit(&entry.id, kind);
        info!(
            target: "flock.core.scheduler",
            task = %entry.id,
            status = %status,
            errors = entry.errors.len(),
            "task finished"
        );
    }

    /// Apply one line of worker output. Returns `true` once the task has
    /// reached a terminal state through it.
    pub(crate) fn apply_output(self: &Arc<Self>, id: &TaskId, output: WorkerOutput) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.registry.get_mut(id) else {
            return true;
        };
        if entry.status != TaskStatus::Running {
            debug!(target: "flock.core.scheduler", task = %id, "output after task ended ignored");
            return true;
        }

        let terminal = match output {
            WorkerOutput::Message(msg) => self.apply_message(entry, msg),
            WorkerOutput::Stdout(line) => {
                self.emit(id, log_kind(LogLevel::Info, line, LogSource::Stdout));
                None
            }
            WorkerOutput::Stderr(line) => {
                self.emit(id, log_kind(LogLevel::Warn, line, LogSource::Stderr));
                None
            }
        };

        match terminal {
            Some(status) => {
                self.finish(entry, status);
                self.admit(&mut state);
                true
            }
            None => false,
        }
    }

    fn apply_message(&self, entry: &mut TaskEntry, msg: WorkerMessage) -> Option<TaskStatus> {
        match msg {
            WorkerMessage::Progress(mut progress) => {
                progress.percent = entry.report_progress(progress.percent);
                self.emit(&entry.id, TaskEventKind::Progress(progress));
                None
            }
            WorkerMessage::Result { payload } => {
                entry.results.push(payload.clone());
                self.emit(&entry.id, TaskEventKind::Result { payload });
                None
            }
            WorkerMessage::Error { kind, message } => {
                self.record_error(entry, kind, message);
                None
            }
            WorkerMessage::Log {
                level,
                message,
                timestamp,
            } => {
                self.emit(
                    &entry.id,
                    TaskEventKind::Log {
                        level,
                        message,
                        source: LogSource::Worker,
                        worker_timestamp: timestamp,
                    },
                );
                None
            }
            WorkerMessage::Completed { .. } | WorkerMessage::Failed { .. }
                if entry.stop_requested =>
            {
                Some(TaskStatus::Stopped)
            }
            WorkerMessage::Completed { summary } => {
                entry.summary = summary;
                Some(TaskStatus::Completed)
            }
            WorkerMessage::Failed { message } => {
                self.record_error(entry, ErrorKind::Script, message);
                Some(TaskStatus::Failed)
            }
        }
    }

    /// Settle a task whose worker exited without a terminal message.
    pub(crate) fn apply_exit(self: &Arc<Self>, id: &TaskId, exit: Result<WorkerExit, String>) {
        let mut state = self.lock();
        let Some(entry) = state.registry.get_mut(id) else {
            return;
        };
        if entry.status != TaskStatus::Running {
            return;
        }

        let status = if entry.stop_requested {
            TaskStatus::Stopped
        } else {
            match exit {
                Ok(exit) if exit.success() => TaskStatus::Completed,
                Ok(exit) => {
                    self.record_error(entry, ErrorKind::Exit, format!("worker {exit}"));
                    TaskStatus::Failed
                }
                Err(e) => {
                    self.record_error(entry, ErrorKind::Process, e);
                    TaskStatus::Failed
                }
            }
        };
        self.finish(entry, status);
        self.admit(&mut state);
    }

    /// Record a non-fatal process problem on a running task.
    pub(crate) fn process_error(&self, id: &TaskId, message: String) {
        let mut state = self.lock();
        if let Some(entry) = state.registry.get_mut(id)
            && entry.status == TaskStatus::Running
        {
            self.record_error(entry, ErrorKind::Process, message);
        }
    }
}

fn log_kind(level: LogLevel, message: String, source: LogSource) -> TaskEventKind {
    TaskEventKind::Log {
        level,
        message,
        source,
        worker_timestamp: None,
    }
}
