//! Scheduler-facing handle on one worker process.
//!
//! The worker receives [`SchedulerMessage`]s on stdin and answers with
//! [`WorkerMessage`]s on stdout. Both output pipes are relayed line by line
//! into a single channel of [`WorkerOutput`]s. Stdin is owned by a writer
//! task, so queuing a message never waits on a worker that does not read.

mod command;
pub use command::WorkerCommand;

mod exit;
pub use exit::WorkerExit;

use std::process::Stdio;

use flock_model::{SchedulerMessage, WorkerMessage};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin},
    sync::mpsc,
};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, trace};

use crate::{error::ExecError, util::kill_forcefully};

/// One line of worker output.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutput {
    /// A well-formed protocol message from stdout.
    Message(WorkerMessage),
    /// A stdout line that is not a protocol message.
    Stdout(String),
    /// A stderr line.
    Stderr(String),
}

/// A spawned worker process.
///
/// Dropping the handle kills the process and abandons unwritten input.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    stdin: Option<mpsc::UnboundedSender<String>>,
    writer: Option<AbortOnDropHandle<()>>,
    pid: Option<u32>,
}

impl WorkerProcess {
    /// Spawn the worker and start relaying its output.
    ///
    /// The returned receiver closes once both stdout and stderr reach EOF.
    pub fn spawn(
        cmd: &WorkerCommand,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerOutput>), ExecError> {
        if cmd.program.trim().is_empty() {
            return Err(ExecError::MissingProgram);
        }

        trace!(target: "flock.exec.proc", program = %cmd.program, args = ?cmd.args, "spawn");

        let mut command = cmd.build();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{}: {e}", cmd.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecError::Spawn("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Spawn("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Spawn("stderr not captured".into()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(relay_lines(stdout, tx.clone(), Stream::Stdout));
        tokio::spawn(relay_lines(stderr, tx, Stream::Stderr));

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let writer = AbortOnDropHandle::new(tokio::spawn(write_lines(stdin, in_rx)));

        let pid = child.id();
        debug!(target: "flock.exec.proc", pid, program = %cmd.program, "worker spawned");

        Ok((
            Self {
                child,
                stdin: Some(in_tx),
                writer: Some(writer),
                pid,
            },
            rx,
        ))
    }

    /// OS process id captured at spawn time.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Queue one protocol message for the worker's stdin.
    ///
    /// Returns as soon as the line is queued; the writer task delivers it in
    /// order. Fails with [`ExecError::ChannelClosed`] once stdin is closed or
    /// a previous write hit a broken pipe.
    pub fn send(&self, msg: &SchedulerMessage) -> Result<(), ExecError> {
        let stdin = self.stdin.as_ref().ok_or(ExecError::ChannelClosed)?;
        let line = msg.to_line()?;
        stdin.send(line).map_err(|_| ExecError::ChannelClosed)
    }

    /// Close stdin after queued lines are written; well-behaved workers
    /// treat EOF as a stop request.
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Wait for the process to exit. Cancel-safe.
    pub async fn wait(&mut self) -> Result<WorkerExit, ExecError> {
        let status = self.child.wait().await?;
        Ok(WorkerExit::from(status))
    }

    /// Non-blocking exit check.
    pub fn try_wait(&mut self) -> Result<Option<WorkerExit>, ExecError> {
        Ok(self.child.try_wait()?.map(WorkerExit::from))
    }

    /// Forcefully terminate and reap the process.
    pub async fn kill(&mut self) -> Result<(), ExecError> {
        debug!(target: "flock.exec.proc", pid = self.pid, "killing worker");
        self.stdin.take();
        self.writer.take();
        kill_forcefully(&mut self.child).await?;
        Ok(())
    }
}

async fn write_lines(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            debug!(target: "flock.exec.proc", error = %e, "worker stdin write failed");
            break;
        }
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

async fn relay_lines<R>(reader: R, tx: mpsc::UnboundedSender<WorkerOutput>, stream: Stream)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(target: "flock.exec.proc", error = %e, "worker pipe read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let out = match stream {
            Stream::Stderr => WorkerOutput::Stderr(line),
            Stream::Stdout => match WorkerMessage::from_line(&line) {
                Ok(msg) => WorkerOutput::Message(msg),
                Err(e) => {
                    trace!(target: "flock.exec.proc", error = %e, "non-protocol stdout line");
                    WorkerOutput::Stdout(line)
                }
            },
        };
        if tx.send(out).is_err() {
            break;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use flock_model::Progress;

    fn sh(script: &str) -> WorkerCommand {
        WorkerCommand::new("sh").with_args(["-c", script])
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<WorkerOutput>) -> Vec<WorkerOutput> {
        let mut out = Vec::new();
        while let Some(o) = rx.recv().await {
            out.push(o);
        }
        out
    }

    #[tokio::test]
    async fn relays_protocol_messages_in_order() {
        let cmd = sh(r#"read line
echo '{"type":"progress","percent":50,"current":1,"total":2}'
echo '{"type":"completed"}'"#);
        let (mut proc, rx) = WorkerProcess::spawn(&cmd).unwrap();
        assert!(proc.id().is_some());
        proc.send(&SchedulerMessage::Stop).unwrap();

        let exit = proc.wait().await.unwrap();
        assert!(exit.success());

        let out = drain(rx).await;
        assert_eq!(
            out,
            vec![
                WorkerOutput::Message(WorkerMessage::Progress(Progress::from_counts(1, 2))),
                WorkerOutput::Message(WorkerMessage::Completed { summary: None }),
            ]
        );
    }

    #[tokio::test]
    async fn non_protocol_lines_are_kept() {
        let cmd = sh("echo hello; echo oops >&2; exit 3");
        let (mut proc, rx) = WorkerProcess::spawn(&cmd).unwrap();

        let exit = proc.wait().await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success());

        let mut out = drain(rx).await;
        out.sort_by_key(|o| format!("{o:?}"));
        assert_eq!(
            out,
            vec![
                WorkerOutput::Stderr("oops".into()),
                WorkerOutput::Stdout("hello".into()),
            ]
        );
    }

    #[tokio::test]
    async fn kill_terminates_a_hanging_worker() {
        let (mut proc, _rx) = WorkerProcess::spawn(&sh("exec sleep 30")).unwrap();
        proc.kill().await.unwrap();

        let exit = proc.wait().await.unwrap();
        assert!(!exit.success());
        assert_eq!(exit.signal, Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn missing_program_is_rejected() {
        let err = WorkerProcess::spawn(&WorkerCommand::default()).unwrap_err();
        assert!(matches!(err, ExecError::MissingProgram));
    }

    #[tokio::test]
    async fn unknown_program_fails_to_spawn() {
        let err = WorkerProcess::spawn(&WorkerCommand::new("/nonexistent/flock-worker")).unwrap_err();
        assert!(matches!(err, ExecError::Spawn(_)));
    }

    #[tokio::test]
    async fn send_after_kill_reports_closed_channel() {
        let (mut proc, _rx) = WorkerProcess::spawn(&sh("exec sleep 30")).unwrap();
        proc.kill().await.unwrap();
        let err = proc.send(&SchedulerMessage::Stop).unwrap_err();
        assert!(matches!(err, ExecError::ChannelClosed));
    }

    #[tokio::test]
    async fn send_does_not_wait_on_a_worker_that_never_reads() {
        let (mut proc, _rx) = WorkerProcess::spawn(&sh("exec sleep 30")).unwrap();
        let big = SchedulerMessage::Execute {
            script: "chat".into(),
            params: Default::default(),
            wallets: (0..8000)
                .map(|i| flock_model::WalletRef::new(format!("0x{i:040x}")))
                .collect(),
        };
        assert!(big.to_line().unwrap().len() > 256 * 1024);

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            proc.send(&big).unwrap();
            proc.send(&SchedulerMessage::Stop).unwrap();
            proc.kill().await.unwrap();
        })
        .await
        .expect("queuing input blocked on the pipe");

        let exit = proc.wait().await.unwrap();
        assert_eq!(exit.signal, Some(libc::SIGKILL));
    }
}
