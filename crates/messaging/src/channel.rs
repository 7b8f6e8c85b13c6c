use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::Result;

/// Provisioning record for a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

impl TopicConfig {
    /// Partition count used when a topic is created implicitly.
    pub const DEFAULT_PARTITIONS: i32 = 3;

    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
        }
    }

    /// A topic with the default partition count and a single replica.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, Self::DEFAULT_PARTITIONS, 1)
    }
}

/// Where a published record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub partition: i32,
    pub offset: i64,
}

/// Commits a delivery's offset for its consumer group.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, topic: &str, partition: i32, offset: i64) -> Result<()>;
}

/// One record handed to a subscriber.
///
/// Dropping a delivery without calling [`Delivery::ack`] leaves its offset
/// uncommitted; it is redelivered once the group restarts.
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<String>,
        payload: Vec<u8>,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            payload,
            acker,
        }
    }

    /// Commits this delivery's offset.
    pub async fn ack(self) -> Result<()> {
        self.acker
            .ack(&self.topic, self.partition, self.offset)
            .await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Stream of deliveries for one subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

/// A partitioned topic broker with consumer groups.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Publishes a record. Records with the same key land on the same partition.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<PublishReceipt>;

    /// Joins `group` on `topic`, starting after the group's last committed offset.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<DeliveryStream>;
}

#[async_trait]
impl<T: EventChannel + ?Sized> EventChannel for Arc<T> {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<PublishReceipt> {
        (**self).publish(topic, key, payload).await
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<DeliveryStream> {
        (**self).subscribe(topic, group).await
    }
}
