//! One binary, two roles.
//!
//! Without arguments it hosts a scheduler and submits a few demo jobs.
//! With `worker` it is the worker process the scheduler launches for each
//! job: it serves the `wallet-ping` script over stdin/stdout.

use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use serde_json::json;
use tracing::info;

use flock_batch::{BatchOptions, BatchProgress, BatchRunner, ItemStatus};
use flock_core::{SchedulerConfig, TaskScheduler};
use flock_exec::{
    ScriptContext, ScriptError, ScriptRegistry, WorkerCommand, script_fn, serve,
};
use flock_model::{ErrorKind, Params, Payload, WalletRef};
use flock_observe::{Journal, LoggerConfig, logger_init};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match env::args().nth(1).as_deref() {
        Some("worker") => run_worker().await,
        _ => run_host().await,
    }
}

async fn run_host() -> anyhow::Result<()> {
    // 1) Logger
    logger_init(&LoggerConfig::default())?;
    info!("logger initialized");

    // 2) Scheduler; every job runs in a copy of this binary
    let exe = env::current_exe().context("locate own executable")?;
    let worker = WorkerCommand::new(exe.to_string_lossy().into_owned()).with_args(["worker"]);
    let scheduler = TaskScheduler::start(SchedulerConfig::new(worker).with_concurrency_limit(2));
    scheduler.subscribe(Arc::new(Journal::new())).detach();
    let (_events, mut rx) = scheduler.relay().channel();

    // 3) Jobs
    let mut pending = 0usize;
    for batch in 0..3 {
        let mut wallets: Vec<WalletRef> = (0..4)
            .map(|i| WalletRef::new(format!("0x{batch}{i:02}")).with_label(format!("demo-{batch}-{i}")))
            .collect();
        if batch == 1 {
            wallets.push(WalletRef::new("0xdead"));
        }

        let mut params = Params::new();
        params.insert("delayMs".into(), json!(150));
        params.insert("concurrency".into(), json!(2));

        let id = scheduler.submit("wallet-ping", params, wallets)?;
        info!(task = %id, "job submitted");
        pending += 1;
    }

    // 4) Wait for every job or Ctrl+C
    info!("press Ctrl+C to stop");
    while pending > 0 {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) if event.is_terminal() => pending -= 1,
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    for snap in scheduler.list_tasks() {
        info!(
            task = %snap.id,
            status = %snap.status,
            progress = snap.progress,
            results = snap.results.len(),
            errors = snap.errors.len(),
            "final state"
        );
    }

    info!("shutting down...");
    scheduler.shutdown().await;
    Ok(())
}

async fn run_worker() -> anyhow::Result<()> {
    // stdout belongs to the protocol
    logger_init(&LoggerConfig::worker())?;

    let registry = ScriptRegistry::new();
    registry.register("wallet-ping", script_fn(wallet_ping));

    serve(registry).await?;
    Ok(())
}

/// Pretend to talk to every wallet, a few at a time.
async fn wallet_ping(ctx: ScriptContext) -> Result<Option<Payload>, ScriptError> {
    let delay = Duration::from_millis(ctx.param("delayMs").unwrap_or(200));
    let concurrency: usize = ctx.param("concurrency").unwrap_or(2);

    let runner: BatchRunner<WalletRef, Payload> = BatchRunner::new();
    runner.add_items(ctx.wallets.clone(), move |wallet, item| async move {
        tokio::select! {
            _ = item.signal.cancelled() => anyhow::bail!("cancelled"),
            _ = tokio::time::sleep(delay) => {}
        }
        if wallet.address.ends_with("dead") {
            anyhow::bail!("wallet {} rejected the request", wallet.address);
        }
        Ok(json!({ "address": wallet.address, "attempt": item.attempt }))
    });

    let reporter = ctx.reporter.clone();
    let options = BatchOptions::new()
        .with_concurrency(concurrency)
        .with_retry_delay(Duration::from_millis(100))
        .with_progress(move |p: &BatchProgress<Payload>| {
            reporter.progress_counts(p.current as u64, p.total as u64, p.item_id.clone());
            match (&p.status, &p.result) {
                (ItemStatus::Success, Some(result)) => reporter.result(result.clone()),
                (ItemStatus::Success, None) => {}
                (ItemStatus::Failed, _) => reporter.error(
                    ErrorKind::Item,
                    format!(
                        "{}: {}",
                        p.item_id,
                        p.error.as_deref().unwrap_or("failed")
                    ),
                ),
            }
        });

    // scheduler stop -> batch stop
    let stopper = runner.clone();
    let cancel = ctx.cancel.clone();
    let watcher = tokio::spawn(async move {
        cancel.cancelled().await;
        stopper.stop();
    });

    let outcome = runner.start(options).await;
    watcher.abort();
    let summary = outcome?;

    Ok(Some(json!({
        "success": summary.success_count,
        "errors": summary.error_count,
        "durationMs": summary.duration_ms() as u64,
    })))
}
