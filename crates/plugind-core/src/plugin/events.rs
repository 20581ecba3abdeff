//! Status event bus
//!
//! In-process publish/subscribe for `PluginStatusChangeEvent`. Each subscriber owns
//! an unbounded channel; publishing under one lock keeps every subscriber's view in
//! publish order.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::plugin::types::PluginStatusChangeEvent;

/// Handle used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end of a subscription
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<PluginStatusChangeEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<PluginStatusChangeEvent> {
        self.receiver.recv().await
    }

    /// Blocking variant for callers outside the runtime
    pub fn blocking_recv(&mut self) -> Option<PluginStatusChangeEvent> {
        self.receiver.blocking_recv()
    }

    pub fn try_recv(&mut self) -> Option<PluginStatusChangeEvent> {
        self.receiver.try_recv().ok()
    }
}

type Subscriber = (SubscriptionId, mpsc::UnboundedSender<PluginStatusChangeEvent>);

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it sees only events published from now on
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push((id, sender));
        Subscription { id, receiver }
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver to every live subscriber, pruning closed ones
    pub fn publish(&self, event: PluginStatusChangeEvent) {
        trace!(plugin = %event.plugin_name, status = %event.status, "publish status event");

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(_, sender)| sender.send(event.clone()).is_ok());
    }
}
