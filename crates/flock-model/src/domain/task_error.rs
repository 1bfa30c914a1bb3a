use std::{fmt, time::SystemTime};

use serde::{Deserialize, Serialize};

use super::time_serde;

/// Error taxonomy recorded on a task.
///
/// Scripts may report kinds of their own; those are kept verbatim as
/// [`ErrorKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorKind {
    /// Bad submission input.
    Validation,
    /// Spawn or pipe failure.
    Process,
    /// Abnormal process termination.
    Exit,
    /// A single per-wallet item exhausted its retries.
    Item,
    /// An operation observed a stop signal.
    Cancellation,
    /// Worker reported `failed`.
    Script,
    /// Worker produced something the protocol does not allow.
    Protocol,
    /// A script-defined kind, e.g. `rpc_timeout`.
    Other(String),
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Process => "process",
            ErrorKind::Exit => "exit",
            ErrorKind::Item => "item",
            ErrorKind::Cancellation => "cancellation",
            ErrorKind::Script => "script",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Other(kind) => kind,
        }
    }
}

impl From<String> for ErrorKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "validation" => ErrorKind::Validation,
            "process" => ErrorKind::Process,
            "exit" => ErrorKind::Exit,
            "item" => ErrorKind::Item,
            "cancellation" => ErrorKind::Cancellation,
            "script" => ErrorKind::Script,
            "protocol" => ErrorKind::Protocol,
            _ => ErrorKind::Other(kind),
        }
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Other(kind) => kind,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a task's append-only error list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(with = "time_serde")]
    pub timestamp: SystemTime,
}

impl TaskErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: SystemTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kinds_keep_their_wire_names() {
        let json = serde_json::to_string(&ErrorKind::Cancellation).unwrap();
        assert_eq!(json, "\"cancellation\"");
        let kind: ErrorKind = serde_json::from_str("\"script\"").unwrap();
        assert_eq!(kind, ErrorKind::Script);
    }

    #[test]
    fn script_defined_kinds_are_kept_verbatim() {
        let kind: ErrorKind = serde_json::from_str("\"rpc_timeout\"").unwrap();
        assert_eq!(kind, ErrorKind::Other("rpc_timeout".into()));
        assert_eq!(kind.to_string(), "rpc_timeout");
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"rpc_timeout\"");
    }
}
