//! In-process topic/group message bus.
//!
//! Every consumer group registered on a topic gets its own FIFO queue and a
//! copy of each message published to that topic. Subscribers sharing a
//! group compete for that one queue, so each message reaches one of them.
//! A group lives as long as it has a subscriber; once the last one is
//! dropped the group and its queue go with it. Messages published to a
//! topic with no groups are dropped. Nothing is persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

use crate::errors::{ShardlineError, ShardlineResult};
use crate::models::RecordMessage;
use crate::shutdown::ShutdownSignal;

/// One delivered message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub group: String,
    pub payload: Vec<u8>,
}

type SharedReceiver = Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>;

struct GroupQueue {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: SharedReceiver,
}

impl GroupQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

#[derive(Default)]
struct BusInner {
    topics: RwLock<HashMap<String, IndexMap<String, GroupQueue>>>,
    closed: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("topics", &self.inner.topics.read().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> ShardlineResult<()> {
        if self.is_closed() {
            return Err(ShardlineError::Bus("bus is closed".into()));
        }
        Ok(())
    }

    /// Join `group` on `topic`, registering the group on first use.
    pub fn subscribe(&self, topic: &str, group: &str) -> ShardlineResult<Subscription> {
        self.ensure_open()?;
        let mut topics = self.inner.topics.write();
        let queue = topics
            .entry(topic.to_string())
            .or_default()
            .entry(group.to_string())
            .or_insert_with(|| {
                debug!(topic, group, "registered consumer group");
                GroupQueue::new()
            });
        Ok(Subscription {
            topic: topic.to_string(),
            group: group.to_string(),
            rx: Arc::clone(&queue.rx),
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Deliver `payload` to every group on `topic`. Returns the number of
    /// groups reached.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> ShardlineResult<usize> {
        self.ensure_open()?;
        let topics = self.inner.topics.read();
        let Some(groups) = topics.get(topic).filter(|g| !g.is_empty()) else {
            debug!(topic, "no consumer group, message dropped");
            return Ok(0);
        };

        let mut delivered = 0;
        for (group, queue) in groups {
            let envelope = Envelope {
                topic: topic.to_string(),
                group: group.clone(),
                payload: payload.clone(),
            };
            if queue.tx.send(envelope).is_ok() {
                delivered += 1;
            }
        }
        trace!(topic, delivered, "published");
        Ok(delivered)
    }

    pub fn publish_record(&self, topic: &str, message: &RecordMessage) -> ShardlineResult<usize> {
        self.publish(topic, message.encode()?)
    }

    pub fn groups(&self, topic: &str) -> Vec<String> {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(|groups| groups.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Refuse further publishes and let subscribers drain what is queued.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.topics.write().clear();
        debug!("bus closed");
    }
}

/// A consumer's handle on one group queue.
pub struct Subscription {
    topic: String,
    group: String,
    rx: SharedReceiver,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Next message, or `None` once cancelled or once the bus is closed and
    /// the queue is drained. Cancellation wins when both are ready.
    pub async fn recv(&self, signal: &mut ShutdownSignal) -> Option<Envelope> {
        let mut rx = tokio::select! {
            biased;
            _ = signal.cancelled() => return None,
            guard = self.rx.lock() => guard,
        };
        tokio::select! {
            biased;
            _ = signal.cancelled() => None,
            message = rx.recv() => message,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        // Subscribing takes the same lock, so the count cannot move under us.
        let mut topics = inner.topics.write();
        let Some(groups) = topics.get_mut(&self.topic) else {
            return;
        };
        let last = groups.get(&self.group).is_some_and(|queue| {
            Arc::ptr_eq(&queue.rx, &self.rx) && Arc::strong_count(&self.rx) == 2
        });
        if last {
            groups.shift_remove(&self.group);
            if groups.is_empty() {
                topics.remove(&self.topic);
            }
            debug!(topic = %self.topic, group = %self.group, "last subscriber left, group removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::models::Operation;
    use crate::shutdown;

    #[tokio::test]
    async fn every_group_gets_a_copy() {
        let bus = MessageBus::new();
        let search = bus.subscribe("record.changed", "search").unwrap();
        let audit = bus.subscribe("record.changed", "audit").unwrap();
        let (_handle, mut signal) = shutdown::channel();

        let msg = RecordMessage::new(Operation::Create, "post", "1", 0);
        assert_eq!(bus.publish_record("record.changed", &msg).unwrap(), 2);

        for sub in [&search, &audit] {
            let envelope = sub.recv(&mut signal).await.unwrap();
            assert_eq!(envelope.group, sub.group());
            assert_eq!(RecordMessage::decode(&envelope.payload).unwrap(), msg);
        }
        assert_eq!(bus.groups("record.changed"), vec!["search", "audit"]);
    }

    #[tokio::test]
    async fn members_of_one_group_compete() {
        let bus = MessageBus::new();
        let a = bus.subscribe("t", "workers").unwrap();
        let b = bus.subscribe("t", "workers").unwrap();
        let (_handle, mut signal) = shutdown::channel();

        for i in 0..4u8 {
            assert_eq!(bus.publish("t", vec![i]).unwrap(), 1);
        }
        let mut got = Vec::new();
        for sub in [&a, &b, &a, &b] {
            got.push(sub.recv(&mut signal).await.unwrap().payload[0]);
        }
        assert_eq!(got, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn unsubscribed_topic_drops_messages() {
        let bus = MessageBus::new();
        assert_eq!(bus.publish("nobody", b"x".to_vec()).unwrap(), 0);
        assert!(bus.groups("nobody").is_empty());
    }

    #[tokio::test]
    async fn close_rejects_publish_and_ends_recv() {
        let bus = MessageBus::new();
        let sub = bus.subscribe("t", "g").unwrap();
        bus.publish("t", b"last".to_vec()).unwrap();
        bus.close();

        assert!(matches!(
            bus.publish("t", b"late".to_vec()),
            Err(ShardlineError::Bus(_))
        ));
        assert!(bus.subscribe("t", "g").is_err());

        let (_handle, mut signal) = shutdown::channel();
        assert_eq!(sub.recv(&mut signal).await.unwrap().payload, b"last");
        assert!(sub.recv(&mut signal).await.is_none());
    }

    #[tokio::test]
    async fn group_without_subscribers_is_removed() {
        let bus = MessageBus::new();
        let first = bus.subscribe("t", "search").unwrap();
        let second = bus.subscribe("t", "search").unwrap();
        let audit = bus.subscribe("t", "audit").unwrap();

        drop(first);
        assert_eq!(bus.groups("t"), vec!["search", "audit"]);
        drop(second);
        assert_eq!(bus.groups("t"), vec!["audit"]);
        drop(audit);
        assert!(bus.groups("t").is_empty());

        for i in 0..100u8 {
            assert_eq!(bus.publish("t", vec![i]).unwrap(), 0);
        }

        let late = bus.subscribe("t", "search").unwrap();
        bus.publish("t", b"fresh".to_vec()).unwrap();
        let (_handle, mut signal) = shutdown::channel();
        assert_eq!(late.recv(&mut signal).await.unwrap().payload, b"fresh");
    }

    #[tokio::test]
    async fn cancellation_wins_over_pending_messages() {
        let bus = MessageBus::new();
        let sub = bus.subscribe("t", "g").unwrap();
        bus.publish("t", b"queued".to_vec()).unwrap();

        let (handle, mut signal) = shutdown::channel();
        handle.cancel();
        let next = tokio::time::timeout(Duration::from_secs(1), sub.recv(&mut signal))
            .await
            .unwrap();
        assert!(next.is_none());
    }
}
