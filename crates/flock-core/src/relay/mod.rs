//! Fan-out of task events to external observers.
//!
//! Emission never blocks and never fails: every subscriber owns an unbounded
//! queue, and a subscriber whose queue is gone is dropped on the next emit.

mod event;
pub use event::{LogSource, TaskEvent, TaskEventKind};

mod subscribe;
pub use subscribe::Subscribe;

use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::mpsc;
use tracing::{error, trace};

/// Event fan-out shared by the scheduler and its observers.
#[derive(Clone, Default)]
pub struct EventRelay {
    inner: Arc<RelayInner>,
}

#[derive(Default)]
struct RelayInner {
    sinks: Mutex<Vec<Sink>>,
    next_id: AtomicU64,
}

struct Sink {
    id: u64,
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl RelayInner {
    fn sinks(&self) -> MutexGuard<'_, Vec<Sink>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(self: &Arc<Self>, tx: mpsc::UnboundedSender<TaskEvent>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sinks().push(Sink { id, tx });
        Subscription {
            relay: Arc::downgrade(self),
            id,
            detached: false,
        }
    }

    fn remove(&self, id: u64) -> bool {
        let mut sinks = self.sinks();
        let before = sinks.len();
        sinks.retain(|s| s.id != id);
        sinks.len() != before
    }
}

impl EventRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every live subscriber.
    pub fn emit(&self, event: TaskEvent) {
        trace!(target: "flock.core.relay", task = %event.task_id, event = event.name(), "emit");
        self.inner
            .sinks()
            .retain(|sink| sink.tx.send(event.clone()).is_ok());
    }

    /// Run `subscriber` on its own task, fed in emission order.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscribe>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.inner.register(tx);
        tokio::spawn(drive_subscriber(subscriber, rx));
        subscription
    }

    /// Raw stream of events.
    pub fn channel(&self) -> (Subscription, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.inner.register(tx), rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sinks().len()
    }
}

impl fmt::Debug for EventRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRelay")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

async fn drive_subscriber(
    subscriber: Arc<dyn Subscribe>,
    mut rx: mpsc::UnboundedReceiver<TaskEvent>,
) {
    while let Some(event) = rx.recv().await {
        let task = event.task_id.clone();
        let name = event.name();
        let sub = Arc::clone(&subscriber);

        // Own task per delivery so a panic stays contained.
        let delivery = tokio::spawn(async move { sub.on_event(&event).await });
        if let Err(e) = delivery.await
            && e.is_panic()
        {
            error!(
                target: "flock.core.relay",
                subscriber = subscriber.name(),
                task = %task,
                event = name,
                "subscriber panicked while processing an event"
            );
        }
    }
    trace!(target: "flock.core.relay", subscriber = subscriber.name(), "subscriber detached");
}

/// Registration handle; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    relay: Weak<RelayInner>,
    id: u64,
    detached: bool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the subscriber registered for the relay's whole lifetime.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(relay) = self.relay.upgrade() {
            relay.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("detached", &self.detached)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex as StdMutex, time::Duration};

    use async_trait::async_trait;
    use flock_model::TaskId;

    use super::*;

    fn created(id: &str) -> TaskEvent {
        TaskEvent::new(
            TaskId::from(id),
            TaskEventKind::Created {
                script: "chat".into(),
                wallet_count: 1,
            },
        )
    }

    #[derive(Default)]
    struct Recorder {
        seen: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &TaskEvent) {
            if event.task_id.as_str() == "boom" {
                panic!("observer bug");
            }
            self.seen.lock().unwrap().push(event.task_id.to_string());
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn channel_receives_in_emission_order() {
        let relay = EventRelay::new();
        let (_sub, mut rx) = relay.channel();

        for id in ["a", "b", "c"] {
            relay.emit(created(id));
        }

        let mut got = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            got.push(ev.task_id.to_string());
        }
        assert_eq!(got, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn dropping_the_subscription_unsubscribes() {
        let relay = EventRelay::new();
        let (sub, mut rx) = relay.channel();
        assert_eq!(relay.subscriber_count(), 1);

        drop(sub);
        assert_eq!(relay.subscriber_count(), 0);
        relay.emit(created("a"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn detached_subscription_stays_registered() {
        let relay = EventRelay::new();
        let (sub, mut rx) = relay.channel();
        sub.detach();

        relay.emit(created("a"));
        assert_eq!(relay.subscriber_count(), 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn closed_receivers_are_pruned_on_emit() {
        let relay = EventRelay::new();
        let (sub, rx) = relay.channel();
        sub.detach();
        drop(rx);

        relay.emit(created("a"));
        assert_eq!(relay.subscriber_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_subscriber_keeps_receiving() {
        let relay = EventRelay::new();
        let recorder = Arc::new(Recorder::default());
        let _sub = relay.subscribe(recorder.clone());

        relay.emit(created("a"));
        relay.emit(created("boom"));
        relay.emit(created("b"));
        settle().await;

        assert_eq!(*recorder.seen.lock().unwrap(), ["a", "b"]);
    }

    #[tokio::test]
    async fn unsubscribe_is_explicit_drop() {
        let relay = EventRelay::new();
        let recorder = Arc::new(Recorder::default());
        let sub = relay.subscribe(recorder.clone());
        sub.unsubscribe();

        relay.emit(created("a"));
        settle().await;
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
