use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use convo_types::events::{InboundChannel, OutboundIntent};

pub type SubscriptionId = u64;

/// A live handler registration. Events for `channel` arrive on `events`
/// until the subscription is handed back to [`Transport::off`].
pub struct Subscription {
    pub id: SubscriptionId,
    pub channel: InboundChannel,
    pub events: mpsc::UnboundedReceiver<Value>,
}

/// The real-time connection as the session sees it.
///
/// Inbound traffic is delivered per channel to subscribers; outbound intents
/// are fire-and-forget.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self);
    fn disconnect(&self);
    fn is_connected(&self) -> bool;
    fn on(&self, channel: InboundChannel) -> Subscription;
    fn off(&self, subscription: Subscription);
    fn emit(&self, intent: &OutboundIntent);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process transport. Whoever holds a clone can push inbound events with
/// [`ChannelTransport::deliver`] and inspect what was emitted.
#[derive(Clone, Default)]
pub struct ChannelTransport {
    inner: Arc<TransportInner>,
}

#[derive(Default)]
struct TransportInner {
    connected: AtomicBool,
    next_id: AtomicU64,

    /// channel -> (subscription id -> sender)
    subscribers: Mutex<HashMap<InboundChannel, HashMap<SubscriptionId, mpsc::UnboundedSender<Value>>>>,

    /// Every intent emitted while connected, in order.
    emitted: Mutex<Vec<OutboundIntent>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an inbound event to every subscriber of `channel`. Returns how
    /// many subscribers received it. Nothing is delivered while disconnected.
    pub fn deliver(&self, channel: InboundChannel, payload: Value) -> usize {
        if !self.is_connected() {
            debug!(channel = channel.name(), "Dropping inbound event, transport disconnected");
            return 0;
        }
        let mut subscribers = lock(&self.inner.subscribers);
        let Some(handlers) = subscribers.get_mut(&channel) else {
            return 0;
        };
        // Receivers dropped without `off` are pruned here.
        handlers.retain(|_, tx| tx.send(payload.clone()).is_ok());
        handlers.len()
    }

    pub fn subscriber_count(&self, channel: InboundChannel) -> usize {
        lock(&self.inner.subscribers)
            .get(&channel)
            .map_or(0, HashMap::len)
    }

    pub fn emitted(&self) -> Vec<OutboundIntent> {
        lock(&self.inner.emitted).clone()
    }

    pub fn take_emitted(&self) -> Vec<OutboundIntent> {
        std::mem::take(&mut *lock(&self.inner.emitted))
    }
}

impl Transport for ChannelTransport {
    fn connect(&self) {
        if !self.inner.connected.swap(true, Ordering::AcqRel) {
            info!("Transport connected");
        }
    }

    fn disconnect(&self) {
        if self.inner.connected.swap(false, Ordering::AcqRel) {
            info!("Transport disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    fn on(&self, channel: InboundChannel) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscribers)
            .entry(channel)
            .or_default()
            .insert(id, tx);
        debug!(channel = channel.name(), subscription = id, "Subscribed");
        Subscription {
            id,
            channel,
            events: rx,
        }
    }

    fn off(&self, subscription: Subscription) {
        let mut subscribers = lock(&self.inner.subscribers);
        if let Some(handlers) = subscribers.get_mut(&subscription.channel) {
            handlers.remove(&subscription.id);
        }
        debug!(
            channel = subscription.channel.name(),
            subscription = subscription.id,
            "Unsubscribed"
        );
    }

    fn emit(&self, intent: &OutboundIntent) {
        if !self.is_connected() {
            debug!(channel = intent.channel(), "Not connected, intent dropped");
            return;
        }
        trace!(channel = intent.channel(), payload = %intent.payload(), "Emit");
        lock(&self.inner.emitted).push(intent.clone());
    }
}
