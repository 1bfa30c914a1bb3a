//! Task scheduler, registry and event relay.
//!
//! [`TaskScheduler`] owns every submitted task, admits them under a global
//! concurrency ceiling, runs each one in its own worker process and reports
//! what happens through the [`EventRelay`].

pub mod config;
pub use config::SchedulerConfig;

mod error;
pub use error::{SchedulerError, ValidationError};

mod state;

pub mod relay;
pub use relay::{EventRelay, LogSource, Subscribe, Subscription, TaskEvent, TaskEventKind};

mod scheduler;
pub use scheduler::TaskScheduler;

pub mod prelude {
    pub use crate::{
        EventRelay, SchedulerConfig, SchedulerError, Subscribe, Subscription, TaskEvent,
        TaskEventKind, TaskScheduler, ValidationError,
    };
    pub use flock_model::{
        Params, TaskId, TaskQuery, TaskSnapshot, TaskStatus, WalletRef,
    };
}
