//! Publish/subscribe channel for model insert/update/delete notifications.
//!
//! Each subscriber owns an unbounded mpsc receiver. Dropping the
//! [`Subscription`] removes it from the bus, so views that go away stop
//! receiving events without any explicit teardown call.

use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelEventKind {
    #[serde(rename = "MODEL_INSERT")]
    Insert,
    #[serde(rename = "MODEL_UPDATE")]
    Update,
    #[serde(rename = "MODEL_DELETE")]
    Delete,
}

impl ModelEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelEventKind::Insert => "MODEL_INSERT",
            ModelEventKind::Update => "MODEL_UPDATE",
            ModelEventKind::Delete => "MODEL_DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEvent {
    pub id: Uuid,
    pub kind: ModelEventKind,
    pub model_name: String,
    pub record: Value,
}

impl ModelEvent {
    pub fn new(kind: ModelEventKind, model_name: impl Into<String>, record: Value) -> Self {
        Self { id: Uuid::new_v4(), kind, model_name: model_name.into(), record }
    }
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: FxHashMap<u64, mpsc::UnboundedSender<ModelEvent>>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

static GLOBAL: Lazy<EventBus> = Lazy::new(EventBus::new);

impl EventBus {
    pub fn new() -> Self { Self::default() }

    /// Process-wide bus shared by forms and tables that were not handed one explicitly.
    pub fn global() -> &'static EventBus { &GLOBAL }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);
        debug!(subscriber = id, total = inner.subscribers.len(), "events: subscribed");
        Subscription { id, rx, bus: Arc::downgrade(&self.inner) }
    }

    /// Deliver to every live subscriber; returns how many received the event.
    pub fn publish(&self, event: ModelEvent) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|_, tx| !tx.is_closed());
        let mut delivered = 0usize;
        for tx in inner.subscribers.values() {
            if tx.send(event.clone()).is_ok() { delivered += 1; }
        }
        debug!(kind = event.kind.as_str(), model = %event.model_name, delivered, "events: published");
        delivered
    }

    pub fn subscriber_count(&self) -> usize { self.lock().subscribers.len() }
}

/// Receiving end of a bus subscription. Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ModelEvent>,
    bus: Weak<Mutex<BusInner>>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ModelEvent> { self.rx.recv().await }

    pub fn try_recv(&mut self) -> Option<ModelEvent> { self.rx.try_recv().ok() }

    /// All events queued so far, without waiting.
    pub fn drain(&mut self) -> Vec<ModelEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.rx.try_recv() { out.push(ev); }
        out
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            let mut inner = bus.lock().unwrap_or_else(|e| e.into_inner());
            inner.subscribers.remove(&self.id);
            debug!(subscriber = self.id, total = inner.subscribers.len(), "events: unsubscribed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publish_reaches_live_subscribers_only() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        drop(b);
        assert_eq!(bus.subscriber_count(), 1);
        let n = bus.publish(ModelEvent::new(ModelEventKind::Insert, "post", json!({"id": 1})));
        assert_eq!(n, 1);
        let ev = a.try_recv().unwrap();
        assert_eq!(ev.kind, ModelEventKind::Insert);
        assert_eq!(ev.model_name, "post");
        assert!(a.try_recv().is_none());
        a.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn event_kind_wire_names() {
        assert_eq!(serde_json::to_value(ModelEventKind::Update).unwrap(), json!("MODEL_UPDATE"));
        assert_eq!(ModelEventKind::Delete.as_str(), "MODEL_DELETE");
    }
}
