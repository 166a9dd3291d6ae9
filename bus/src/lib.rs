#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! A topic-keyed publish/subscribe bus for live transfer lifecycle observation.
//!
//! Global topics (e.g. `"payment_confirmed"`) fan out to every subscriber; the
//! per-transfer convention `transfer:<id>` fans out only to subscribers that opted in.
//! Delivery is best-effort: a subscriber whose channel is full or closed is dropped from
//! the topic rather than allowed to stall a broadcast. There is no replay — the store's
//! event log is the durable record, this bus is for observers that are connected right now.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

/// How often the bus checks subscriber liveness and evicts stale entries.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Depth of each subscriber's mailbox before delivery is considered failed and the
/// subscriber is dropped.
const MAILBOX_CAPACITY: usize = 256;

/// A lifecycle event published to a topic.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// The event type, e.g. `"payment_confirmed"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary structured payload.
    pub data: serde_json::Value,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Builds the standard `transfer:<id>` topic name.
    #[must_use]
    pub fn transfer_topic(id: i64) -> String {
        format!("transfer:{id}")
    }
}

type SubscriberId = u64;

#[derive(Debug)]
struct Subscriber {
    sender: mpsc::Sender<Event>,
    last_seen: Instant,
}

/// A handle returned from [`EventBus::subscribe`]. Dropping it does not unsubscribe; call
/// [`EventBus::unsubscribe`] explicitly (mirroring the connection-owns-lifecycle pattern used
/// by the subscription endpoint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: SubscriberId,
}

/// Process-local event bus. Cheap to clone; intended to be held as a single `Arc<EventBus>`
/// shared by the executor (publisher) and the HTTP layer (subscriber registrar), never as
/// ambient global state.
#[derive(Debug)]
pub struct EventBus {
    topics: DashMap<String, DashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new subscriber on `topic`, returning the subscription handle and the
    /// receiving end of its mailbox.
    pub fn subscribe(&self, topic: &str) -> (Subscription, mpsc::Receiver<Event>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.topics.entry(topic.to_owned()).or_default().insert(
            id,
            Subscriber {
                sender: tx,
                last_seen: Instant::now(),
            },
        );
        (Subscription { id }, rx)
    }

    /// Removes a subscriber from `topic`.
    pub fn unsubscribe(&self, topic: &str, subscription: Subscription) {
        if let Some(subscribers) = self.topics.get(topic) {
            subscribers.remove(&subscription.id);
        }
    }

    /// Removes a subscriber from every topic it is registered on. Called when a connection
    /// closes.
    pub fn unsubscribe_all(&self, subscription: Subscription) {
        for entry in &self.topics {
            entry.value().remove(&subscription.id);
        }
    }

    /// Publishes `event` to `topic`. Subscribers with a full or closed mailbox are dropped
    /// silently; this is best-effort delivery, not a guarantee.
    pub fn publish(&self, topic: &str, event: Event) {
        let Some(subscribers) = self.topics.get(topic) else {
            return;
        };
        let mut dead = Vec::new();
        for entry in subscribers.iter() {
            match entry.value().sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(_) => dead.push(*entry.key()),
            }
        }
        drop(subscribers);
        if !dead.is_empty() {
            if let Some(subscribers) = self.topics.get(topic) {
                for id in dead {
                    subscribers.remove(&id);
                }
            }
        }
    }

    /// Publishes to both the global topic `kind` and, if `transfer_id` is given, the
    /// matching `transfer:<id>` topic.
    pub fn publish_lifecycle(&self, kind: &str, transfer_id: Option<i64>, data: serde_json::Value) {
        let event = Event {
            kind: kind.to_owned(),
            data,
            timestamp: Utc::now(),
        };
        self.publish(kind, event.clone());
        if let Some(id) = transfer_id {
            self.publish(&Event::transfer_topic(id), event);
        }
    }

    /// Marks a subscriber as having responded to a transport-level ping.
    pub fn touch(&self, topic: &str, subscription: Subscription) {
        if let Some(subscribers) = self.topics.get(topic) {
            if let Some(mut sub) = subscribers.get_mut(&subscription.id) {
                sub.last_seen = Instant::now();
            }
        }
    }

    /// Evicts subscribers that have not been touched within `HEARTBEAT_INTERVAL * 2`. Meant
    /// to be driven by a periodic task alongside transport-level pings.
    pub fn evict_stale(&self) {
        let cutoff = Instant::now() - HEARTBEAT_INTERVAL * 2;
        for entry in &self.topics {
            entry.value().retain(|_, sub| sub.last_seen > cutoff);
        }
    }

    /// Total subscriber count across all topics, for diagnostics.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.topics.iter().map(|e| e.value().len()).sum()
    }
}

/// Spawns the periodic heartbeat-eviction task. Returns a handle the caller should abort on
/// shutdown.
pub fn spawn_heartbeat(bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            interval.tick().await;
            bus.evict_stale();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let (_sub, mut rx) = bus.subscribe("payment_confirmed");
        bus.publish_lifecycle("payment_confirmed", Some(42), serde_json::json!({"transferId": 42}));
        let event = rx.recv().await.expect("event delivered");
        assert_eq!(event.kind, "payment_confirmed");
    }

    #[tokio::test]
    async fn per_transfer_topic_is_isolated() {
        let bus = EventBus::new();
        let (_sub, mut rx) = bus.subscribe(&Event::transfer_topic(1));
        bus.publish_lifecycle("payment_confirmed", Some(2), serde_json::json!({}));
        assert!(rx.try_recv().is_err());
        bus.publish_lifecycle("payment_confirmed", Some(1), serde_json::json!({}));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (sub, mut rx) = bus.subscribe("payment_pending");
        bus.unsubscribe("payment_pending", sub);
        bus.publish_lifecycle("payment_pending", None, serde_json::json!({}));
        assert!(rx.try_recv().is_err());
    }
}
