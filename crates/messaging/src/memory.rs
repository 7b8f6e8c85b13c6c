//! In-process event channel.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::{
    Acknowledger, ChannelError, Delivery, DeliveryStream, EventChannel, PublishReceipt, Result,
    TopicConfig,
};

/// A record as stored on a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct Topic {
    partitions: Vec<Vec<StoredRecord>>,
}

impl Topic {
    fn new(partitions: i32) -> Self {
        Self {
            partitions: vec![Vec::new(); partitions.max(1) as usize],
        }
    }
}

/// Offsets of one consumer group on one topic.
#[derive(Debug)]
struct GroupState {
    /// Next offset to resume from per partition; advanced by acks only.
    committed: Vec<i64>,
    /// Next offset to hand out per partition.
    cursor: Vec<i64>,
    /// Bumped by a reset; subscriptions of an older generation end.
    generation: u64,
}

impl GroupState {
    fn new(partitions: usize) -> Self {
        Self {
            committed: vec![0; partitions],
            cursor: vec![0; partitions],
            generation: 0,
        }
    }
}

enum Next {
    Record(StoredRecord),
    Empty,
    Ended,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Topic>,
    groups: HashMap<(String, String), GroupState>,
    closed: bool,
}

impl State {
    fn ensure_topic(&mut self, name: &str) -> &mut Topic {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Topic::new(TopicConfig::DEFAULT_PARTITIONS))
    }

    fn next_record(&mut self, topic: &str, group: &str, generation: u64) -> Next {
        if self.closed {
            return Next::Ended;
        }
        let Some(partitions) = self.topics.get(topic).map(|t| &t.partitions) else {
            return Next::Empty;
        };
        let Some(state) = self.groups.get_mut(&(topic.to_string(), group.to_string())) else {
            return Next::Ended;
        };
        if state.generation != generation {
            return Next::Ended;
        }

        for (partition, records) in partitions.iter().enumerate() {
            let cursor = state.cursor[partition];
            if let Some(record) = records.get(cursor as usize) {
                state.cursor[partition] = cursor + 1;
                return Next::Record(record.clone());
            }
        }
        Next::Empty
    }
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    fail_on_publish: AtomicBool,
}

/// In-memory channel for testing and single-process deployments.
///
/// Behaves like a broker with consumer groups: records are partitioned by
/// key hash, each group has its own committed offsets, and within a group
/// every record is handed to one subscriber. Offsets advance only on ack.
#[derive(Clone)]
pub struct InMemoryEventChannel {
    inner: Arc<Inner>,
}

impl Default for InMemoryEventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventChannel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                fail_on_publish: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a topic. Existing topics are left as they are.
    pub async fn create_topic(&self, config: &TopicConfig) {
        let mut state = self.inner.state.lock().await;
        state
            .topics
            .entry(config.name.clone())
            .or_insert_with(|| Topic::new(config.partitions));
    }

    /// Makes every publish fail until reset.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.inner.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Simulates a restart of every subscriber in `group`.
    ///
    /// Open subscriptions end, and the next subscription resumes from the
    /// committed offsets, so unacknowledged deliveries come again.
    pub async fn reset_group(&self, topic: &str, group: &str) {
        {
            let mut state = self.inner.state.lock().await;
            if let Some(g) = state.groups.get_mut(&(topic.to_string(), group.to_string())) {
                g.cursor = g.committed.clone();
                g.generation += 1;
            }
        }
        self.inner.notify.notify_waiters();
    }

    /// Ends every open subscription and rejects further calls.
    pub async fn close(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.notify.notify_waiters();
    }

    /// Returns every record of a topic, by partition then offset.
    pub async fn records(&self, topic: &str) -> Vec<StoredRecord> {
        let state = self.inner.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|t| t.partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the committed offset per partition for a group.
    pub async fn committed_offsets(&self, topic: &str, group: &str) -> Vec<i64> {
        let state = self.inner.state.lock().await;
        state
            .groups
            .get(&(topic.to_string(), group.to_string()))
            .map(|g| g.committed.clone())
            .unwrap_or_default()
    }

    /// Returns the number of partitions of a topic, if it exists.
    pub async fn partition_count(&self, topic: &str) -> Option<usize> {
        let state = self.inner.state.lock().await;
        state.topics.get(topic).map(|t| t.partitions.len())
    }
}

/// Picks the partition for a key. Stable for the life of the process.
fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}

#[async_trait]
impl EventChannel for InMemoryEventChannel {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<PublishReceipt> {
        if self.inner.fail_on_publish.load(Ordering::SeqCst) {
            return Err(ChannelError::PublishFailed {
                topic: topic.to_string(),
                reason: "broker unavailable".to_string(),
            });
        }

        let receipt = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Err(ChannelError::Closed);
            }
            let partitions = &mut state.ensure_topic(topic).partitions;
            let partition = partition_for(key, partitions.len());
            let records = &mut partitions[partition];
            let offset = records.len() as i64;
            records.push(StoredRecord {
                partition: partition as i32,
                offset,
                key: Some(key.to_string()),
                payload: payload.to_vec(),
            });
            PublishReceipt {
                partition: partition as i32,
                offset,
            }
        };

        tracing::debug!(
            topic,
            key,
            partition = receipt.partition,
            offset = receipt.offset,
            "Record published"
        );
        self.inner.notify.notify_waiters();
        Ok(receipt)
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<DeliveryStream> {
        let generation = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Err(ChannelError::Closed);
            }
            let partitions = state.ensure_topic(topic).partitions.len();
            state
                .groups
                .entry((topic.to_string(), group.to_string()))
                .or_insert_with(|| GroupState::new(partitions))
                .generation
        };

        tracing::info!(topic, group, generation, "Subscribed");

        let inner = self.inner.clone();
        let topic = topic.to_string();
        let group = group.to_string();
        let acker: Arc<dyn Acknowledger> = Arc::new(GroupAcker {
            inner: inner.clone(),
            group: group.clone(),
        });

        let stream = async_stream::stream! {
            loop {
                // Registered before the check so a publish in between is not missed
                let notified = inner.notify.notified();
                let next = inner.state.lock().await.next_record(&topic, &group, generation);
                match next {
                    Next::Record(record) => {
                        yield Ok(Delivery::new(
                            topic.clone(),
                            record.partition,
                            record.offset,
                            record.key,
                            record.payload,
                            acker.clone(),
                        ));
                    }
                    Next::Empty => notified.await,
                    Next::Ended => break,
                }
            }
            tracing::debug!(topic = %topic, group = %group, "Subscription ended");
        };

        Ok(Box::pin(stream))
    }
}

struct GroupAcker {
    inner: Arc<Inner>,
    group: String,
}

#[async_trait]
impl Acknowledger for GroupAcker {
    async fn ack(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let committed = state
            .groups
            .get_mut(&(topic.to_string(), self.group.clone()))
            .and_then(|g| g.committed.get_mut(partition as usize))
            .ok_or_else(|| ChannelError::CommitFailed {
                topic: topic.to_string(),
                partition,
                offset,
                reason: format!("no such partition for group '{}'", self.group),
            })?;
        *committed = (*committed).max(offset + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::StreamExt;

    use super::*;

    const TOPIC: &str = "rating-topic";
    const GROUP: &str = "rating-group";

    async fn next(stream: &mut DeliveryStream) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timed out waiting for delivery")
            .expect("stream ended")
            .expect("delivery error")
    }

    async fn assert_idle(stream: &mut DeliveryStream) {
        let result = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(result.is_err(), "expected no delivery");
    }

    #[tokio::test]
    async fn same_key_lands_on_same_partition_in_order() {
        let channel = InMemoryEventChannel::new();
        let a = channel.publish(TOPIC, "1:1", b"first").await.unwrap();
        let b = channel.publish(TOPIC, "1:1", b"second").await.unwrap();

        assert_eq!(a.partition, b.partition);
        assert_eq!(b.offset, a.offset + 1);
        assert_eq!(channel.partition_count(TOPIC).await, Some(3));
    }

    #[tokio::test]
    async fn explicit_topic_config_sets_partition_count() {
        let channel = InMemoryEventChannel::new();
        channel.create_topic(&TopicConfig::new("audit", 5, 1)).await;
        assert_eq!(channel.partition_count("audit").await, Some(5));
    }

    #[tokio::test]
    async fn subscriber_sees_records_published_before_and_after() {
        let channel = InMemoryEventChannel::new();
        channel.publish(TOPIC, "1:1", b"early").await.unwrap();

        let mut stream = channel.subscribe(TOPIC, GROUP).await.unwrap();
        assert_eq!(next(&mut stream).await.payload, b"early");

        let publisher = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(TOPIC, "2:2", b"late").await.unwrap();
        });
        assert_eq!(next(&mut stream).await.payload, b"late");
    }

    #[tokio::test]
    async fn each_group_receives_every_record() {
        let channel = InMemoryEventChannel::new();
        let mut ratings = channel.subscribe(TOPIC, GROUP).await.unwrap();
        let mut audit = channel.subscribe(TOPIC, "audit-group").await.unwrap();

        channel.publish(TOPIC, "1:1", b"event").await.unwrap();

        assert_eq!(next(&mut ratings).await.payload, b"event");
        assert_eq!(next(&mut audit).await.payload, b"event");
    }

    #[tokio::test]
    async fn ack_commits_offset() {
        let channel = InMemoryEventChannel::new();
        let receipt = channel.publish(TOPIC, "1:1", b"event").await.unwrap();
        let mut stream = channel.subscribe(TOPIC, GROUP).await.unwrap();

        next(&mut stream).await.ack().await.unwrap();

        let committed = channel.committed_offsets(TOPIC, GROUP).await;
        assert_eq!(committed[receipt.partition as usize], receipt.offset + 1);
    }

    #[tokio::test]
    async fn unacked_delivery_is_redelivered_after_reset() {
        let channel = InMemoryEventChannel::new();
        channel.publish(TOPIC, "1:1", b"acked").await.unwrap();
        channel.publish(TOPIC, "1:1", b"dropped").await.unwrap();

        let mut stream = channel.subscribe(TOPIC, GROUP).await.unwrap();
        next(&mut stream).await.ack().await.unwrap();
        let dropped = next(&mut stream).await;
        assert_eq!(dropped.payload, b"dropped");
        drop(dropped);

        channel.reset_group(TOPIC, GROUP).await;
        assert!(stream.next().await.is_none(), "old subscription should end");

        let mut restarted = channel.subscribe(TOPIC, GROUP).await.unwrap();
        let again = next(&mut restarted).await;
        assert_eq!(again.payload, b"dropped");
        again.ack().await.unwrap();
        assert_idle(&mut restarted).await;
    }

    #[tokio::test]
    async fn injected_publish_failure() {
        let channel = InMemoryEventChannel::new();
        channel.set_fail_on_publish(true);

        let result = channel.publish(TOPIC, "1:1", b"event").await;
        assert!(matches!(result, Err(ChannelError::PublishFailed { .. })));
        assert!(channel.records(TOPIC).await.is_empty());

        channel.set_fail_on_publish(false);
        assert!(channel.publish(TOPIC, "1:1", b"event").await.is_ok());
        assert_eq!(channel.records(TOPIC).await.len(), 1);
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let channel = InMemoryEventChannel::new();
        let mut stream = channel.subscribe(TOPIC, GROUP).await.unwrap();

        channel.close().await;
        assert!(stream.next().await.is_none());
        assert_eq!(
            channel.publish(TOPIC, "1:1", b"x").await.unwrap_err(),
            ChannelError::Closed
        );
    }
}
