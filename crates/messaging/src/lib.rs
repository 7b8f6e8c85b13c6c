//! Event channel abstraction.
//!
//! A channel carries keyed records on partitioned topics. Subscribers join a
//! consumer group and receive [`Delivery`] values; a delivery's offset is
//! committed only when the subscriber acknowledges it, so anything not
//! acknowledged before a crash is delivered again (at-least-once).

pub mod channel;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

pub use channel::{
    Acknowledger, Delivery, DeliveryStream, EventChannel, PublishReceipt, TopicConfig,
};
pub use error::{ChannelError, Result};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaEventChannel};
pub use memory::InMemoryEventChannel;
