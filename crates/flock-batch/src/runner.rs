use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::{sync::watch, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    BatchError, BatchItem, BatchOptions, BatchProgress, BatchStatus, BatchSummary, ItemContext,
    ItemError, ItemStatus, WalletSubJob, item::erase,
};

/// Concurrent work-queue executor.
///
/// Cloning yields another handle to the same runner, so `pause`, `resume`
/// and `stop` can be called while `start` is being awaited elsewhere.
pub struct BatchRunner<I, R> {
    shared: Arc<Shared<I, R>>,
}

struct Shared<I, R> {
    state: Mutex<RunState<I, R>>,
    paused: watch::Sender<bool>,
    cancel: Mutex<StopSignal>,
    running: AtomicBool,
}

/// Cancellation for the run in progress, or a stop held for the next one.
#[derive(Default)]
struct StopSignal {
    token: Option<CancellationToken>,
    pending: bool,
}

struct RunState<I, R> {
    queue: VecDeque<WalletSubJob<I, R>>,
    active: usize,
    success_count: usize,
    error_count: usize,
    results: HashMap<String, R>,
    errors: HashMap<String, ItemError>,
    /// First item that tripped `stop_on_error`: (id, message).
    abort: Option<(String, String)>,
}

impl<I, R> RunState<I, R> {
    fn reset(&mut self) {
        self.active = 0;
        self.success_count = 0;
        self.error_count = 0;
        self.results.clear();
        self.errors.clear();
        self.abort = None;
    }

    fn summary(&self, success: bool, duration: Duration) -> BatchSummary<R>
    where
        R: Clone,
    {
        BatchSummary {
            success,
            total_tasks: self.success_count + self.error_count + self.queue.len(),
            success_count: self.success_count,
            error_count: self.error_count,
            duration,
            results: self.results.clone(),
            errors: self.errors.clone(),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<I, R> Clone for BatchRunner<I, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<I, R> Default for BatchRunner<I, R>
where
    I: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I, R> BatchRunner<I, R>
where
    I: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RunState {
                    queue: VecDeque::new(),
                    active: 0,
                    success_count: 0,
                    error_count: 0,
                    results: HashMap::new(),
                    errors: HashMap::new(),
                    abort: None,
                }),
                paused,
                cancel: Mutex::new(StopSignal::default()),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Append items to the pending queue, all bound to the same task function.
    ///
    /// Items sharing an id land on the same result/error slot. Safe to call
    /// while a run is in progress. Returns the number of items added.
    pub fn add_items<It, F, Fut>(&self, items: It, task_fn: F) -> usize
    where
        It: IntoIterator<Item = I>,
        I: BatchItem,
        F: Fn(I, ItemContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let task_fn = erase(task_fn);
        let mut state = lock(&self.shared.state);
        let before = state.queue.len();
        state.queue.extend(
            items
                .into_iter()
                .map(|item| WalletSubJob::new(item, Arc::clone(&task_fn))),
        );
        let added = state.queue.len() - before;
        trace!(target: "flock.batch", added, queued = state.queue.len(), "items enqueued");
        added
    }

    /// Drain the queue.
    ///
    /// Resolves once every admitted item has settled. Each item runs at most
    /// `max_retries + 1` times and never more than `concurrency` task function
    /// invocations are in flight. Item failures are aggregated into the
    /// summary unless `stop_on_error` is set.
    pub async fn start(
        &self,
        options: BatchOptions<R>,
    ) -> Result<BatchSummary<R>, BatchError<R>> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(BatchError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.shared.running);

        let token = CancellationToken::new();
        {
            let mut signal = lock(&self.shared.cancel);
            if std::mem::take(&mut signal.pending) {
                debug!(target: "flock.batch", "stop was requested before start");
                token.cancel();
            }
            signal.token = Some(token.clone());
        }
        lock(&self.shared.state).reset();

        let options = Arc::new(options);
        let concurrency = options.effective_concurrency();
        let started = Instant::now();
        let mut in_flight: JoinSet<()> = JoinSet::new();

        debug!(
            target: "flock.batch",
            concurrency,
            max_retries = options.max_retries,
            queued = self.queued(),
            "batch started"
        );

        let aborted = loop {
            self.wait_while_paused(&token).await;
            if token.is_cancelled() {
                break true;
            }

            {
                let mut state = lock(&self.shared.state);
                while state.active < concurrency {
                    let Some(job) = state.queue.pop_front() else {
                        break;
                    };
                    state.active += 1;
                    trace!(target: "flock.batch", item = %job.id, active = state.active, "item admitted");
                    in_flight.spawn(run_item(
                        Arc::clone(&self.shared),
                        job,
                        Arc::clone(&options),
                        token.clone(),
                    ));
                }
            }

            if in_flight.is_empty() {
                break false;
            }

            tokio::select! {
                joined = in_flight.join_next() => {
                    if let Some(Err(e)) = joined {
                        warn!(target: "flock.batch", error = %e, "item driver terminated abnormally");
                    }
                }
                _ = token.cancelled() => {}
            }
        };

        if aborted {
            debug!(target: "flock.batch", in_flight = in_flight.len(), "batch aborted; waiting for in-flight items");
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    warn!(target: "flock.batch", error = %e, "item driver terminated abnormally");
                }
            }
        }

        lock(&self.shared.cancel).token = None;

        let state = lock(&self.shared.state);
        let summary = Box::new(state.summary(!aborted, started.elapsed()));
        debug!(
            target: "flock.batch",
            success = summary.success_count,
            errors = summary.error_count,
            duration_ms = summary.duration_ms() as u64,
            aborted,
            "batch finished"
        );

        match (aborted, state.abort.clone()) {
            (false, _) => Ok(*summary),
            (true, Some((id, message))) => Err(BatchError::ItemFailed {
                id,
                message,
                summary,
            }),
            (true, None) => Err(BatchError::Cancelled { summary }),
        }
    }

    /// Halt admission of new items. In-flight items keep running.
    pub fn pause(&self) {
        if !self.shared.paused.send_replace(true) {
            debug!(target: "flock.batch", "pause requested");
        }
    }

    pub fn resume(&self) {
        if self.shared.paused.send_replace(false) {
            debug!(target: "flock.batch", "resume requested");
        }
    }

    /// Cancel the current run. `start` resolves once in-flight items notice.
    ///
    /// A stop issued while idle is held and cancels the next `start`, which
    /// then returns [`BatchError::Cancelled`] without running any item.
    pub fn stop(&self) {
        let mut signal = lock(&self.shared.cancel);
        match &signal.token {
            Some(token) => token.cancel(),
            None => {
                debug!(target: "flock.batch", "stop requested while idle; holding it for the next run");
                signal.pending = true;
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.paused.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }

    pub fn status(&self) -> BatchStatus {
        let state = lock(&self.shared.state);
        BatchStatus {
            running: self.is_running(),
            paused: self.is_paused(),
            queued: state.queue.len(),
            active: state.active,
            success: state.success_count,
            errors: state.error_count,
        }
    }

    async fn wait_while_paused(&self, token: &CancellationToken) {
        let mut rx = self.shared.paused.subscribe();
        loop {
            let paused = *rx.borrow_and_update();
            if !paused {
                return;
            }
            trace!(target: "flock.batch", "paused; admission halted");
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = token.cancelled() => return,
            }
        }
    }
}

async fn run_item<I, R>(
    shared: Arc<Shared<I, R>>,
    job: WalletSubJob<I, R>,
    options: Arc<BatchOptions<R>>,
    token: CancellationToken,
) where
    I: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    let WalletSubJob {
        id,
        item,
        mut attempt,
        task_fn,
    } = job;

    let outcome: Result<R, ItemError> = loop {
        let ctx = ItemContext {
            attempt,
            max_retries: options.max_retries,
            signal: token.clone(),
        };
        let call = task_fn(item.clone(), ctx);
        let result = match tokio::spawn(call).await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("task function panicked: {e}")),
        };

        let message = match result {
            Ok(value) => break Ok(value),
            Err(e) => format!("{e:#}"),
        };
        if token.is_cancelled() {
            break Err(ItemError {
                message,
                retries: attempt,
                cancelled: true,
            });
        }
        if attempt >= options.max_retries {
            break Err(ItemError {
                message,
                retries: attempt,
                cancelled: false,
            });
        }

        let delay = options.backoff(attempt);
        debug!(
            target: "flock.batch",
            item = %id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %message,
            "item failed; retry scheduled"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = token.cancelled() => {
                break Err(ItemError {
                    message,
                    retries: attempt,
                    cancelled: true,
                });
            }
        }
        attempt += 1;
    };

    let (progress, trip) = {
        let mut state = lock(&shared.state);
        state.active = state.active.saturating_sub(1);

        let (status, result, error, trip) = match outcome {
            Ok(value) => {
                state.success_count += 1;
                state.results.insert(id.clone(), value.clone());
                (ItemStatus::Success, Some(value), None, false)
            }
            Err(err) => {
                state.error_count += 1;
                let trip = options.stop_on_error && !err.cancelled && state.abort.is_none();
                if trip {
                    state.abort = Some((id.clone(), err.message.clone()));
                }
                let message = err.message.clone();
                state.errors.insert(id.clone(), err);
                (ItemStatus::Failed, None, Some(message), trip)
            }
        };

        let current = state.success_count + state.error_count;
        let total = state.queue.len() + state.active + current;
        let progress = BatchProgress {
            current,
            total,
            item_id: id,
            status,
            result,
            error,
        };
        (progress, trip)
    };

    match progress.status {
        ItemStatus::Success => {
            trace!(target: "flock.batch", item = %progress.item_id, current = progress.current, total = progress.total, "item succeeded")
        }
        ItemStatus::Failed => {
            debug!(target: "flock.batch", item = %progress.item_id, current = progress.current, total = progress.total, error = progress.error.as_deref().unwrap_or_default(), "item failed")
        }
    }

    if trip {
        warn!(target: "flock.batch", item = %progress.item_id, "stop_on_error tripped; aborting batch");
        token.cancel();
    }

    if let Some(cb) = &options.on_progress {
        cb(&progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("w{i}")).collect()
    }

    fn fast() -> BatchOptions<String> {
        BatchOptions::new().with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn failing_item_is_retried_then_reported() {
        let runner: BatchRunner<String, String> = BatchRunner::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&attempts);
        runner.add_items(ids(5), move |item: String, _ctx| {
            let seen = Arc::clone(&seen);
            async move {
                if item == "w3" {
                    seen.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("rpc unavailable");
                }
                Ok(format!("{item}-ok"))
            }
        });

        let summary = runner
            .start(fast().with_concurrency(2).with_max_retries(2))
            .await
            .unwrap();

        assert!(summary.success);
        assert_eq!(summary.total_tasks, 5);
        assert_eq!(summary.success_count, 4);
        assert_eq!(summary.error_count, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let err = &summary.errors["w3"];
        assert_eq!(err.retries, 2);
        assert_eq!(err.message, "rpc unavailable");
        assert!(!err.cancelled);
        assert_eq!(summary.results["w1"], "w1-ok");
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_concurrency() {
        let runner: BatchRunner<String, ()> = BatchRunner::new();
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (l, p) = (Arc::clone(&live), Arc::clone(&peak));
        runner.add_items(ids(12), move |_item: String, _ctx| {
            let (live, peak) = (Arc::clone(&l), Arc::clone(&p));
            async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                live.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let summary = runner
            .start(BatchOptions::new().with_concurrency(3))
            .await
            .unwrap();

        assert_eq!(summary.success_count, 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn stop_on_error_aborts_and_keeps_remaining_queue() {
        let runner: BatchRunner<String, String> = BatchRunner::new();
        runner.add_items(ids(5), |item: String, _ctx| async move {
            if item == "w2" {
                anyhow::bail!("insufficient funds");
            }
            Ok(item)
        });

        let err = runner
            .start(
                fast()
                    .with_concurrency(1)
                    .with_max_retries(1)
                    .with_stop_on_error(true),
            )
            .await
            .unwrap_err();

        match &err {
            BatchError::ItemFailed { id, message, summary } => {
                assert_eq!(id, "w2");
                assert_eq!(message, "insufficient funds");
                assert_eq!(summary.success_count, 1);
                assert_eq!(summary.error_count, 1);
                assert!(!summary.success);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runner.queued(), 3);
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn stop_cancels_in_flight_items_cooperatively() {
        let runner: BatchRunner<String, ()> = BatchRunner::new();
        runner.add_items(ids(4), |_item: String, ctx: ItemContext| async move {
            ctx.signal.cancelled().await;
            anyhow::bail!("aborted by signal")
        });

        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.start(BatchOptions::new().with_concurrency(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runner.status().active, 2);
        runner.stop();

        let err = handle.await.unwrap().unwrap_err();
        let summary = match err {
            BatchError::Cancelled { summary } => summary,
            other => panic!("unexpected error: {other:?}"),
        };
        assert_eq!(summary.error_count, 2);
        assert!(summary.errors.values().all(|e| e.cancelled && e.retries == 0));
        assert_eq!(runner.queued(), 2);
    }

    #[tokio::test]
    async fn pause_halts_admission_until_resume() {
        let runner: BatchRunner<String, ()> = BatchRunner::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        runner.add_items(ids(3), move |_item: String, _ctx| {
            let calls = Arc::clone(&c);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        runner.pause();
        assert!(runner.is_paused());

        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.start(BatchOptions::new()).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(runner.status().running);

        runner.resume();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.success_count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stop_while_paused_returns_cancelled() {
        let runner: BatchRunner<String, ()> = BatchRunner::new();
        runner.add_items(ids(2), |_item: String, _ctx| async move { Ok(()) });
        runner.pause();

        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.start(BatchOptions::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        runner.stop();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, BatchError::Cancelled { .. }));
        assert_eq!(err.summary().unwrap().settled(), 0);
    }

    #[tokio::test]
    async fn stop_before_start_cancels_the_next_run_only() {
        let runner: BatchRunner<String, ()> = BatchRunner::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        runner.add_items(ids(2), move |_item: String, _ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        runner.stop();

        let err = runner.start(BatchOptions::new()).await.unwrap_err();
        assert!(matches!(err, BatchError::Cancelled { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(runner.queued(), 2);

        let summary = runner.start(BatchOptions::new()).await.unwrap();
        assert_eq!(summary.success_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn duplicate_ids_collapse_onto_one_slot() {
        let runner: BatchRunner<String, usize> = BatchRunner::new();
        let n = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&n);
        runner.add_items(
            vec!["a".to_string(), "a".to_string(), "b".to_string()],
            move |_item: String, _ctx| {
                let n = Arc::clone(&c);
                async move { Ok(n.fetch_add(1, Ordering::SeqCst)) }
            },
        );

        let summary = runner
            .start(BatchOptions::new().with_concurrency(1))
            .await
            .unwrap();
        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.results.len(), 2);
    }

    #[tokio::test]
    async fn progress_total_tracks_items_added_mid_run() {
        // `total` is derived from live counts, so it moves when the queue grows.
        let runner: BatchRunner<String, ()> = BatchRunner::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handle = runner.clone();
        runner.add_items(ids(2), move |item: String, _ctx| {
            let handle = handle.clone();
            async move {
                if item == "w2" {
                    handle.add_items(
                        vec!["x1".to_string(), "x2".to_string()],
                        |_item: String, _ctx| async move { Ok(()) },
                    );
                }
                Ok(())
            }
        });

        let sink = Arc::clone(&seen);
        let summary = runner
            .start(
                BatchOptions::new()
                    .with_concurrency(1)
                    .with_progress(move |p: &BatchProgress<()>| {
                        sink.lock().unwrap().push((p.current, p.total));
                    }),
            )
            .await
            .unwrap();

        assert_eq!(summary.success_count, 4);
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen.last(), Some(&(4, 4)));
        assert_eq!(seen, vec![(1, 2), (2, 4), (3, 4), (4, 4)]);
    }

    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        let runner: BatchRunner<String, ()> = BatchRunner::new();
        runner.add_items(ids(1), |_item: String, ctx: ItemContext| async move {
            ctx.signal.cancelled().await;
            Ok(())
        });

        let first = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.start(BatchOptions::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = runner.start(BatchOptions::new()).await;
        assert!(matches!(second, Err(BatchError::AlreadyRunning)));

        runner.stop();
        let _ = first.await.unwrap();
    }

    #[tokio::test]
    async fn panicking_task_function_is_recorded_as_failure() {
        let runner: BatchRunner<String, ()> = BatchRunner::new();
        runner.add_items(ids(1), |_item: String, _ctx| async move {
            if true {
                panic!("boom");
            }
            Ok(())
        });

        let summary = runner
            .start(BatchOptions::new().with_max_retries(0))
            .await
            .unwrap();
        assert_eq!(summary.error_count, 1);
        assert!(summary.errors["w1"].message.contains("panicked"));
    }
}
