//! The generic sync worker.
//!
//! A worker is a consuming loop composed from two strategies: a
//! `RecordReader` that re-reads current state and a `Projection` that
//! applies it. Message payloads only name a record; the projection is
//! always fed what the reader returns.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{Envelope, MessageBus, Subscription};
use crate::errors::ShardlineResult;
use crate::models::{Operation, RecordMessage};
use crate::shutdown::ShutdownSignal;
use crate::sync::projection::Projection;
use crate::sync::reader::RecordReader;

/// What happens to a message whose processing fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub dead_letter_topic: Option<String>,
}

impl Default for DeliveryPolicy {
    /// Best effort: one attempt, then drop.
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_backoff: Duration::from_millis(50),
            dead_letter_topic: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, or between messages.
    Idle,
    /// Waiting on the subscription.
    Subscribed,
    /// Handling one message.
    Dispatch,
    Stopped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub ignored: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

pub struct SyncWorker<R, P> {
    name: String,
    interests: HashSet<String>,
    subscription: Subscription,
    bus: MessageBus,
    reader: R,
    projection: P,
    policy: DeliveryPolicy,
    state: watch::Sender<WorkerState>,
}

impl<R, P> SyncWorker<R, P>
where
    R: RecordReader + 'static,
    P: Projection + 'static,
{
    /// Subscribe to `topic` under the projection's group name.
    pub fn new(bus: &MessageBus, topic: &str, reader: R, projection: P) -> ShardlineResult<Self> {
        let subscription = bus.subscribe(topic, projection.name())?;
        let (state, _) = watch::channel(WorkerState::Idle);
        Ok(Self {
            name: projection.name().to_string(),
            interests: HashSet::new(),
            subscription,
            bus: bus.clone(),
            reader,
            projection,
            policy: DeliveryPolicy::default(),
            state,
        })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Entities this worker projects; messages for others are ignored.
    pub fn interested_in<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interests.extend(entities.into_iter().map(Into::into));
        self
    }

    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Observe state transitions after the worker has been moved into a task.
    pub fn state_watch(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    pub fn spawn(self, signal: ShutdownSignal) -> JoinHandle<WorkerStats> {
        tokio::spawn(self.run(signal))
    }

    /// Consume until cancelled or until the bus closes.
    pub async fn run(self, mut signal: ShutdownSignal) -> WorkerStats {
        let mut stats = WorkerStats::default();
        info!(
            worker = %self.name,
            topic = self.subscription.topic(),
            group = self.subscription.group(),
            "sync worker started"
        );
        loop {
            self.set_state(WorkerState::Subscribed);
            let Some(envelope) = self.subscription.recv(&mut signal).await else {
                break;
            };
            self.set_state(WorkerState::Dispatch);
            self.handle(&envelope, &mut stats).await;
            self.set_state(WorkerState::Idle);
        }
        self.set_state(WorkerState::Stopped);
        info!(worker = %self.name, ?stats, "sync worker stopped");
        stats
    }

    async fn handle(&self, envelope: &Envelope, stats: &mut WorkerStats) {
        let message = match RecordMessage::decode(&envelope.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(worker = %self.name, error = %e, "dropping undecodable message");
                stats.failed += 1;
                return;
            }
        };
        if !self.interests.contains(&message.entity_name) {
            debug!(worker = %self.name, entity = %message.entity_name, "not interested");
            stats.ignored += 1;
            return;
        }

        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.apply(&message).await {
                Ok(()) => {
                    stats.processed += 1;
                    return;
                }
                Err(e) => {
                    warn!(
                        worker = %self.name,
                        key = %message.key(),
                        attempt,
                        error = %e,
                        "sync failed"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.retry_backoff).await;
                    }
                }
            }
        }
        stats.failed += 1;

        if let Some(topic) = &self.policy.dead_letter_topic {
            match self.bus.publish(topic, envelope.payload.clone()) {
                Ok(_) => stats.dead_lettered += 1,
                Err(e) => error!(worker = %self.name, topic = %topic, error = %e, "dead letter lost"),
            }
        }
    }

    async fn apply(&self, message: &RecordMessage) -> ShardlineResult<()> {
        match message.operation {
            Operation::Delete => {
                self.projection
                    .remove(&message.entity_name, &message.record_id)
                    .await
            }
            Operation::Create | Operation::Update => match self.reader.fetch(message).await? {
                Some((entity, record)) => {
                    self.projection
                        .upsert(&entity, &message.record_id, &record)
                        .await
                }
                None => {
                    // Gone or soft-deleted since the event was published.
                    debug!(worker = %self.name, key = %message.key(), "read repair: removing");
                    self.projection
                        .remove(&message.entity_name, &message.record_id)
                        .await
                }
            },
        }
    }
}
