//! Shared data model for the flock task engine.
//!
//! - [`domain`]: tasks, wallets, statuses, snapshots and queries.
//! - [`protocol`]: the JSON-lines messages exchanged with worker processes.

mod domain;
pub use domain::*;

pub mod protocol;
pub use protocol::{ProtocolError, SchedulerMessage, WorkerMessage};

/// Opaque, serialization-neutral payload used for script params and results.
pub type Payload = serde_json::Value;

/// Script parameters as a free-form key/value map.
pub type Params = serde_json::Map<String, serde_json::Value>;
