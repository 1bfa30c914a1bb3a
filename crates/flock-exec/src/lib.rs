//! Process side of the flock task engine.
//!
//! - [`proc`]: scheduler-facing handle on one spawned worker process.
//! - [`worker`]: runtime embedded in the worker binary; runs scripts and
//!   speaks the JSON-lines protocol over stdin/stdout.
//! - [`limits`]: POSIX rlimits applied to worker processes.

mod error;
pub use error::{ExecError, ExecResult};

pub mod limits;
pub use limits::RlimitConfig;

#[cfg(feature = "proc")]
mod util;

#[cfg(feature = "proc")]
pub mod proc;
#[cfg(feature = "proc")]
pub use proc::{WorkerCommand, WorkerExit, WorkerOutput, WorkerProcess};

#[cfg(feature = "worker")]
pub mod worker;
#[cfg(feature = "worker")]
pub use worker::{
    Reporter, Script, ScriptContext, ScriptError, ScriptRegistry, script_fn, serve, serve_with,
};

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    #[cfg(feature = "proc")]
    pub use crate::proc::{WorkerCommand, WorkerProcess};
    #[cfg(feature = "worker")]
    pub use crate::worker::{Script, ScriptContext, ScriptError, ScriptRegistry, script_fn};
}
