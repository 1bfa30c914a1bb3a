use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use flock_batch::BatchError;
use flock_model::{Params, Payload, WalletRef};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::worker::Reporter;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
    #[error("unknown script: {0}")]
    UnknownScript(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl<R> From<BatchError<R>> for ScriptError {
    fn from(e: BatchError<R>) -> Self {
        match e {
            BatchError::Cancelled { .. } => ScriptError::Cancelled,
            BatchError::ItemFailed { id, message, .. } => {
                ScriptError::Failed(format!("item {id} failed: {message}"))
            }
            BatchError::AlreadyRunning => ScriptError::Failed("batch runner already running".into()),
        }
    }
}

/// Everything a script gets to work with.
pub struct ScriptContext {
    pub script: String,
    pub params: Params,
    pub wallets: Vec<WalletRef>,
    pub cancel: CancellationToken,
    pub reporter: Reporter,
}

impl ScriptContext {
    /// Typed lookup of a single parameter; `None` if absent or of the wrong shape.
    pub fn param<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.params
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptContext")
            .field("script", &self.script)
            .field("params", &self.params)
            .field("wallets", &self.wallets.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// A user-supplied automation script.
///
/// `Ok(summary)` ends the task as completed; any error ends it as failed.
#[async_trait]
pub trait Script: Send + Sync + 'static {
    async fn run(&self, ctx: ScriptContext) -> Result<Option<Payload>, ScriptError>;
}

struct ScriptFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Script for ScriptFn<F>
where
    F: Fn(ScriptContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Payload>, ScriptError>> + Send + 'static,
{
    async fn run(&self, ctx: ScriptContext) -> Result<Option<Payload>, ScriptError> {
        (self.f)(ctx).await
    }
}

/// Wrap an async closure as a [`Script`].
pub fn script_fn<F, Fut>(f: F) -> Arc<dyn Script>
where
    F: Fn(ScriptContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Payload>, ScriptError>> + Send + 'static,
{
    Arc::new(ScriptFn { f })
}

/// Scripts available inside a worker binary, looked up by name.
#[derive(Default, Clone)]
pub struct ScriptRegistry {
    scripts: Arc<RwLock<HashMap<String, Arc<dyn Script>>>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a script under `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, script: Arc<dyn Script>) -> &Self {
        let name = name.into();
        trace!(target: "flock.exec.worker", script = %name, "script registered");
        self.scripts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, script);
        self
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.scripts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.scripts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.scripts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Script>> {
        self.scripts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptRegistry")
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn Script> {
        script_fn(|_ctx| async move { Ok(None) })
    }

    #[test]
    fn register_and_lookup() {
        let registry = ScriptRegistry::new();
        registry.register("chat", noop());

        assert!(registry.is_registered("chat"));
        assert!(registry.get("chat").is_some());
        assert!(registry.get("swap").is_none());
    }

    #[test]
    fn register_replaces_existing() {
        let registry = ScriptRegistry::new();
        registry.register("chat", noop()).register("chat", noop());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn unregister_removes_script() {
        let registry = ScriptRegistry::new();
        registry.register("chat", noop());

        assert!(registry.unregister("chat"));
        assert!(!registry.unregister("chat"));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn batch_errors_map_onto_script_errors() {
        let cancelled: ScriptError = BatchError::<()>::AlreadyRunning.into();
        assert!(matches!(cancelled, ScriptError::Failed(_)));
    }
}
