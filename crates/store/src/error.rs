use thiserror::Error;

use common::{DriverId, PassengerId, RatingId, TripId};

use crate::OutboxId;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No trip row has this id.
    #[error("Trip not found with id: {0}")]
    TripNotFound(TripId),

    /// No rating row has this id.
    #[error("Rating with id {0} not found.")]
    RatingNotFound(RatingId),

    /// A rating for the pair already exists (uniqueness constraint).
    #[error("Rating for driver {driver_id} and passenger {passenger_id} already exists.")]
    DuplicateRating {
        driver_id: DriverId,
        passenger_id: PassengerId,
    },

    /// No outbox entry has this id.
    #[error("Outbox entry not found: {0}")]
    OutboxEntryNotFound(OutboxId),

    /// A stored value could not be mapped back into a record.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
