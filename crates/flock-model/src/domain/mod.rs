mod task_id;
pub use task_id::TaskId;

mod task_status;
pub use task_status::TaskStatus;

mod wallet;
pub use wallet::{Secret, WalletRef};

mod task_error;
pub use task_error::{ErrorKind, TaskErrorRecord};

mod log_level;
pub use log_level::LogLevel;

mod progress;
pub use progress::Progress;

mod task_snapshot;
pub use task_snapshot::{TaskCounts, TaskSnapshot};

mod task_query;
pub use task_query::{TaskPage, TaskQuery};

pub(crate) mod time_serde;

/// Script identifier as submitted by the caller (e.g. `"chat-bot"`).
pub type ScriptRef = String;
