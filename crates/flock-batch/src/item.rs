use std::{future::Future, pin::Pin, sync::Arc};

use flock_model::WalletRef;
use tokio_util::sync::CancellationToken;

/// Per-invocation context handed to the task function.
#[derive(Debug, Clone)]
pub struct ItemContext {
    /// Zero-based attempt index.
    pub attempt: u32,
    pub max_retries: u32,
    /// Cancelled when the run is stopped; task functions should watch it.
    pub signal: CancellationToken,
}

type BoxFuture<R> = Pin<Box<dyn Future<Output = anyhow::Result<R>> + Send>>;

/// Type-erased async task function: `(item, ctx) -> Result<R>`.
pub type TaskFn<I, R> = Arc<dyn Fn(I, ItemContext) -> BoxFuture<R> + Send + Sync>;

/// Items know their own queue id.
pub trait BatchItem {
    fn item_id(&self) -> String;
}

impl BatchItem for WalletRef {
    fn item_id(&self) -> String {
        self.address.clone()
    }
}

impl BatchItem for String {
    fn item_id(&self) -> String {
        self.clone()
    }
}

/// One queued unit of work.
pub struct WalletSubJob<I, R> {
    pub id: String,
    pub item: I,
    pub attempt: u32,
    pub(crate) task_fn: TaskFn<I, R>,
}

impl<I, R> WalletSubJob<I, R> {
    pub(crate) fn new(item: I, task_fn: TaskFn<I, R>) -> Self
    where
        I: BatchItem,
    {
        Self {
            id: item.item_id(),
            item,
            attempt: 0,
            task_fn,
        }
    }
}

impl<I: std::fmt::Debug, R> std::fmt::Debug for WalletSubJob<I, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSubJob")
            .field("id", &self.id)
            .field("item", &self.item)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

pub(crate) fn erase<I, R, F, Fut>(f: F) -> TaskFn<I, R>
where
    F: Fn(I, ItemContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    Arc::new(move |item, ctx| Box::pin(f(item, ctx)))
}
