//! Pipeline error types.

use common::TripId;
use domain::{DomainError, ErrorKind};
use messaging::ChannelError;
use store::StoreError;
use thiserror::Error;

/// Errors returned by [`crate::ClosureOrchestrator::close_and_rate`].
#[derive(Debug, Error)]
pub enum ClosureError {
    /// Validation, lookup or storage failed; nothing was committed.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The trip was completed but the immediate publish failed.
    ///
    /// The event stays in the outbox and is published by the relay.
    #[error(
        "Trip {trip_id} was completed, but the rating event could not be published ({reason}); it is queued for redelivery"
    )]
    PublishFailed { trip_id: TripId, reason: String },
}

impl ClosureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClosureError::Domain(e) => e.kind(),
            ClosureError::PublishFailed { .. } => ErrorKind::InvalidRequest,
        }
    }
}

impl From<StoreError> for ClosureError {
    fn from(e: StoreError) -> Self {
        ClosureError::Domain(e.into())
    }
}

/// Errors that stop the rating consumer.
///
/// Whatever delivery was in hand when one of these occurred was not
/// acknowledged and will be delivered again.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Failed to subscribe: {0}")]
    Subscribe(ChannelError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Storing a rating kept failing after the configured retries.
    #[error("Storage failed after {attempts} attempts: {source}")]
    Storage {
        attempts: u32,
        #[source]
        source: DomainError,
    },
}
