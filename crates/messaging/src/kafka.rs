//! Kafka-backed event channel.
//!
//! Offsets are committed manually: `enable.auto.commit` is off and a
//! delivery's offset is committed only when it is acknowledged. A consumer
//! that stops before acking gets the record again after the group rebalances.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;

use crate::{
    Acknowledger, ChannelError, Delivery, DeliveryStream, EventChannel, PublishReceipt, Result,
    TopicConfig,
};

/// Connection settings for the Kafka channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    pub brokers: String,
    pub publish_timeout: Duration,
    /// Where a group without committed offsets starts reading.
    pub auto_offset_reset: String,
    /// Capacity of the buffer between the consumer task and the stream.
    pub buffer_size: usize,
}

impl KafkaConfig {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            publish_timeout: Duration::from_secs(5),
            auto_offset_reset: "earliest".to_string(),
            buffer_size: 256,
        }
    }
}

/// Event channel on a Kafka-compatible broker.
#[derive(Clone)]
pub struct KafkaEventChannel {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl KafkaEventChannel {
    /// Creates the producer. Consumers are created per subscription.
    pub fn new(config: KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .map_err(|e| ChannelError::Transport(format!("Failed to create producer: {e}")))?;

        tracing::info!(brokers = %config.brokers, "Kafka channel created");
        Ok(Self { producer, config })
    }

    /// Creates a topic if it does not exist yet.
    pub async fn ensure_topic(&self, topic: &TopicConfig) -> Result<()> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .create()
            .map_err(|e| ChannelError::Transport(format!("Failed to create admin client: {e}")))?;

        let new_topic = NewTopic::new(
            &topic.name,
            topic.partitions,
            TopicReplication::Fixed(topic.replication_factor),
        );
        let results = admin
            .create_topics(&[new_topic], &AdminOptions::new())
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        for result in results {
            match result {
                Ok(name) => tracing::info!(topic = %name, "Topic created"),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    tracing::debug!(topic = %name, "Topic already exists");
                }
                Err((name, code)) => {
                    return Err(ChannelError::Transport(format!(
                        "Failed to create topic '{name}': {code}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventChannel for KafkaEventChannel {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<PublishReceipt> {
        let record = FutureRecord::to(topic).payload(payload).key(key);

        match self
            .producer
            .send(record, Timeout::After(self.config.publish_timeout))
            .await
        {
            Ok((partition, offset)) => {
                tracing::debug!(topic, key, partition, offset, "Record published");
                Ok(PublishReceipt { partition, offset })
            }
            Err((e, _)) => {
                tracing::error!(topic, key, error = %e, "Failed to publish record");
                Err(ChannelError::PublishFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<DeliveryStream> {
        let subscription_error = |reason: String| ChannelError::SubscriptionFailed {
            topic: topic.to_string(),
            reason,
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| subscription_error(format!("Failed to create consumer: {e}")))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| subscription_error(e.to_string()))?;

        tracing::info!(topic, group, manual_commit = true, "Subscribed");

        let consumer = Arc::new(consumer);
        let acker: Arc<dyn Acknowledger> = Arc::new(KafkaAcker {
            consumer: consumer.clone(),
        });
        let (tx, mut rx) = tokio::sync::mpsc::channel(self.config.buffer_size);

        tokio::spawn(async move {
            loop {
                let item = match consumer.recv().await {
                    Ok(message) => {
                        let message = message.detach();
                        Ok(Delivery::new(
                            message.topic(),
                            message.partition(),
                            message.offset(),
                            message
                                .key()
                                .map(|k| String::from_utf8_lossy(k).into_owned()),
                            message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                            acker.clone(),
                        ))
                    }
                    Err(e) => Err(ChannelError::Transport(format!(
                        "Failed to receive message: {e}"
                    ))),
                };
                if tx.send(item).await.is_err() {
                    tracing::debug!("Subscription dropped, stopping consumer task");
                    break;
                }
            }
        });

        let stream = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        };
        Ok(Box::pin(stream))
    }
}

struct KafkaAcker {
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl Acknowledger for KafkaAcker {
    async fn ack(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let commit_error = |reason: String| ChannelError::CommitFailed {
            topic: topic.to_string(),
            partition,
            offset,
            reason,
        };

        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| commit_error(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| commit_error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_channel_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KafkaEventChannel>();
    }

    #[test]
    fn config_defaults() {
        let config = KafkaConfig::new("localhost:9092");
        assert_eq!(config.auto_offset_reset, "earliest");
        assert_eq!(config.publish_timeout, Duration::from_secs(5));
    }
}
