use std::path::PathBuf;

use tokio::process::Command;

use crate::{limits::RlimitConfig, limits::attach_rlimits, util::cmd_program};

/// How to launch a worker process.
///
/// The job itself is not part of the command line: it travels as the
/// `execute` message on stdin, so wallet secrets never show up in `ps`.
#[derive(Clone, Debug, Default)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub limits: RlimitConfig,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_limits(mut self, limits: RlimitConfig) -> Self {
        self.limits = limits;
        self
    }

    pub(crate) fn build(&self) -> Command {
        let mut cmd = cmd_program(&self.program, &self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        attach_rlimits(&mut cmd, &self.limits);
        cmd
    }
}
