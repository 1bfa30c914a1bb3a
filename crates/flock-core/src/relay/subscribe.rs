use async_trait::async_trait;

use super::TaskEvent;

/// Observer of scheduler events.
///
/// Each subscriber is driven by its own task and sees events in emission
/// order. A slow subscriber only delays itself; a panicking one is logged
/// and keeps receiving subsequent events.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &TaskEvent);

    fn name(&self) -> &'static str {
        "subscriber"
    }
}
