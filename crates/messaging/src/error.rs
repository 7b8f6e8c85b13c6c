use thiserror::Error;

/// Errors raised by an event channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Failed to publish to '{topic}': {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("Failed to subscribe to '{topic}': {reason}")]
    SubscriptionFailed { topic: String, reason: String },

    #[error("Failed to commit offset {offset} on {topic}/{partition}: {reason}")]
    CommitFailed {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel is closed")]
    Closed,
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
