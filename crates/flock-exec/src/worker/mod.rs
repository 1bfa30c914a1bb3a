//! Worker-side runtime.
//!
//! A worker binary registers its scripts in a [`ScriptRegistry`] and hands
//! control to [`serve`]. The runtime waits for the `execute` message, runs
//! the named script, turns a `stop` message (or a closed stdin) into
//! cancellation, and writes exactly one terminal message before returning.

mod reporter;
pub use reporter::Reporter;

mod script;
pub use script::{Script, ScriptContext, ScriptError, ScriptRegistry, script_fn};

use flock_model::{ErrorKind, Payload, SchedulerMessage, WorkerMessage};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ExecError, ExecResult};

/// Run one script over the process' stdin/stdout.
pub async fn serve(registry: ScriptRegistry) -> ExecResult<()> {
    serve_with(registry, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Same as [`serve`] over arbitrary streams.
pub async fn serve_with<R, W>(registry: ScriptRegistry, reader: R, writer: W) -> ExecResult<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = Reporter::new(tx);
    let writer = tokio::spawn(write_messages(writer, rx));

    let mut lines = BufReader::new(reader).lines();
    let terminal = match run_script(&registry, &mut lines, &reporter).await {
        Ok(summary) => WorkerMessage::Completed { summary },
        Err(e) => {
            debug!(target: "flock.exec.worker", error = %e, "script failed");
            WorkerMessage::Failed {
                message: e.to_string(),
            }
        }
    };
    reporter.emit(terminal);
    drop(reporter);

    writer
        .await
        .map_err(|e| ExecError::Io(format!("writer task: {e}")))?
}

async fn run_script<R>(
    registry: &ScriptRegistry,
    lines: &mut Lines<BufReader<R>>,
    reporter: &Reporter,
) -> Result<Option<Payload>, ScriptError>
where
    R: AsyncRead + Unpin,
{
    let (name, params, wallets) = loop {
        let Some(line) = lines.next_line().await.map_err(anyhow::Error::from)? else {
            return Err(ScriptError::Failed("stdin closed before execute".into()));
        };
        if line.trim().is_empty() {
            continue;
        }
        match SchedulerMessage::from_line(&line) {
            Ok(SchedulerMessage::Execute {
                script,
                params,
                wallets,
            }) => break (script, params, wallets),
            Ok(SchedulerMessage::Stop) => return Err(ScriptError::Cancelled),
            Err(e) => {
                warn!(target: "flock.exec.worker", error = %e, "undecodable scheduler message");
                reporter.error(ErrorKind::Protocol, e.to_string());
            }
        }
    };

    let script = registry
        .get(&name)
        .ok_or_else(|| ScriptError::UnknownScript(name.clone()))?;

    debug!(target: "flock.exec.worker", script = %name, wallets = wallets.len(), "executing");
    let cancel = CancellationToken::new();
    let ctx = ScriptContext {
        script: name,
        params,
        wallets,
        cancel: cancel.clone(),
        reporter: reporter.clone(),
    };
    let mut job = tokio::spawn(async move { script.run(ctx).await });

    let mut stdin_open = true;
    loop {
        tokio::select! {
            joined = &mut job => {
                return match joined {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_panic() => Err(ScriptError::Failed("script panicked".into())),
                    Err(e) => Err(ScriptError::Failed(e.to_string())),
                };
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match SchedulerMessage::from_line(&line) {
                    Ok(SchedulerMessage::Stop) => {
                        debug!(target: "flock.exec.worker", "stop received");
                        cancel.cancel();
                    }
                    Ok(SchedulerMessage::Execute { .. }) => {
                        warn!(target: "flock.exec.worker", "duplicate execute ignored");
                    }
                    Err(_) if line.trim().is_empty() => {}
                    Err(e) => {
                        warn!(target: "flock.exec.worker", error = %e, "undecodable scheduler message");
                    }
                },
                Ok(None) | Err(_) => {
                    // Scheduler went away; nobody is left to read our output.
                    stdin_open = false;
                    cancel.cancel();
                }
            },
        }
    }
}

async fn write_messages<W>(
    mut out: W,
    mut rx: mpsc::UnboundedReceiver<WorkerMessage>,
) -> ExecResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        let terminal = msg.is_terminal();
        match msg.to_line() {
            Ok(line) => {
                out.write_all(line.as_bytes()).await?;
                out.flush().await?;
            }
            Err(e) => warn!(target: "flock.exec.worker", kind = msg.kind(), error = %e, "dropping unencodable message"),
        }
        if terminal {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use flock_model::{Params, WalletRef};
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};

    use super::*;

    struct Harness {
        to_worker: DuplexStream,
        from_worker: Lines<BufReader<DuplexStream>>,
        served: tokio::task::JoinHandle<ExecResult<()>>,
    }

    fn harness(registry: ScriptRegistry) -> Harness {
        let (to_worker, worker_in) = duplex(64 * 1024);
        let (worker_out, from_worker) = duplex(64 * 1024);
        let served = tokio::spawn(serve_with(registry, worker_in, worker_out));
        Harness {
            to_worker,
            from_worker: BufReader::new(from_worker).lines(),
            served,
        }
    }

    impl Harness {
        async fn send(&mut self, msg: SchedulerMessage) {
            let line = msg.to_line().unwrap();
            self.to_worker.write_all(line.as_bytes()).await.unwrap();
        }

        async fn execute(&mut self, script: &str) {
            self.send(SchedulerMessage::Execute {
                script: script.into(),
                params: Params::new(),
                wallets: vec![WalletRef::new("0xa"), WalletRef::new("0xb")],
            })
            .await;
        }

        async fn collect(mut self) -> Vec<WorkerMessage> {
            let mut out = Vec::new();
            while let Some(line) = self.from_worker.next_line().await.unwrap() {
                out.push(WorkerMessage::from_line(&line).unwrap());
            }
            self.served.await.unwrap().unwrap();
            out
        }
    }

    #[tokio::test]
    async fn completed_after_reports() {
        let registry = ScriptRegistry::new();
        registry.register(
            "count",
            script_fn(|ctx| async move {
                let total = ctx.wallets.len() as u64;
                for (i, w) in ctx.wallets.iter().enumerate() {
                    ctx.reporter.result(json!({ "address": w.address }));
                    ctx.reporter.progress_counts(i as u64 + 1, total, "wallet done");
                }
                Ok(Some(json!({ "done": total })))
            }),
        );

        let mut h = harness(registry);
        h.execute("count").await;
        let msgs = h.collect().await;

        let kinds: Vec<_> = msgs.iter().map(|m| m.kind()).collect();
        assert_eq!(
            kinds,
            ["result", "progress", "result", "progress", "completed"]
        );
        assert_eq!(
            msgs.last(),
            Some(&WorkerMessage::Completed {
                summary: Some(json!({ "done": 2 }))
            })
        );
    }

    #[tokio::test]
    async fn unknown_script_fails() {
        let mut h = harness(ScriptRegistry::new());
        h.execute("missing").await;
        let msgs = h.collect().await;

        assert_eq!(
            msgs,
            vec![WorkerMessage::Failed {
                message: "unknown script: missing".into()
            }]
        );
    }

    #[tokio::test]
    async fn stop_cancels_the_script() {
        let registry = ScriptRegistry::new();
        registry.register(
            "wait",
            script_fn(|ctx| async move {
                ctx.reporter.info("waiting");
                ctx.cancel.cancelled().await;
                Err(ScriptError::Cancelled)
            }),
        );

        let mut h = harness(registry);
        h.execute("wait").await;
        let first = h.from_worker.next_line().await.unwrap().unwrap();
        assert!(matches!(
            WorkerMessage::from_line(&first).unwrap(),
            WorkerMessage::Log { .. }
        ));

        h.send(SchedulerMessage::Stop).await;
        let msgs = h.collect().await;
        assert_eq!(
            msgs,
            vec![WorkerMessage::Failed {
                message: "cancelled".into()
            }]
        );
    }

    #[tokio::test]
    async fn closed_stdin_cancels_the_script() {
        let registry = ScriptRegistry::new();
        registry.register(
            "wait",
            script_fn(|ctx| async move {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => Err(ScriptError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(None),
                }
            }),
        );

        let mut h = harness(registry);
        h.execute("wait").await;
        h.to_worker.shutdown().await.unwrap();

        let msgs = h.collect().await;
        assert!(matches!(msgs.as_slice(), [WorkerMessage::Failed { .. }]));
    }

    #[tokio::test]
    async fn stop_before_execute_fails() {
        let mut h = harness(ScriptRegistry::new());
        h.send(SchedulerMessage::Stop).await;
        let msgs = h.collect().await;
        assert_eq!(
            msgs,
            vec![WorkerMessage::Failed {
                message: "cancelled".into()
            }]
        );
    }

    #[tokio::test]
    async fn script_error_and_panic_become_failed() {
        let registry = ScriptRegistry::new();
        registry
            .register(
                "broken",
                script_fn(|_ctx| async move { Err(ScriptError::Failed("rpc down".into())) }),
            )
            .register(
                "panics",
                script_fn(|ctx| async move {
                    if ctx.wallets.is_empty() {
                        return Ok(None);
                    }
                    panic!("boom")
                }),
            );

        let mut h = harness(registry.clone());
        h.execute("broken").await;
        assert_eq!(
            h.collect().await,
            vec![WorkerMessage::Failed {
                message: "rpc down".into()
            }]
        );

        let mut h = harness(registry);
        h.execute("panics").await;
        assert_eq!(
            h.collect().await,
            vec![WorkerMessage::Failed {
                message: "script panicked".into()
            }]
        );
    }

    #[tokio::test]
    async fn params_are_typed_on_lookup() {
        let registry = ScriptRegistry::new();
        registry.register(
            "echo",
            script_fn(|ctx| async move {
                let rounds: u32 = ctx.param("rounds").unwrap_or(1);
                let missing: Option<String> = ctx.param("nope");
                Ok(Some(json!({ "rounds": rounds, "missing": missing.is_none() })))
            }),
        );

        let mut h = harness(registry);
        let mut params = Params::new();
        params.insert("rounds".into(), json!(4));
        h.send(SchedulerMessage::Execute {
            script: "echo".into(),
            params,
            wallets: vec![WalletRef::new("0xa")],
        })
        .await;

        assert_eq!(
            h.collect().await,
            vec![WorkerMessage::Completed {
                summary: Some(json!({ "rounds": 4, "missing": true }))
            }]
        );
    }
}
