//! Domain error types.

use common::{DriverId, PassengerId, RatingId, TripId, TripStatus};
use store::StoreError;
use thiserror::Error;
use verifier::EntityKind;

use crate::validation::ValidationErrors;

/// Coarse classification of a [`DomainError`], used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Duplicate,
    InvalidRequest,
    Conflict,
    Unavailable,
    Internal,
}

/// Errors that can occur during trip and rating operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Trip not found with id: {0}")]
    TripNotFound(TripId),

    #[error("Rating with id {0} not found.")]
    RatingNotFound(RatingId),

    #[error("Driver not found with id: {0}")]
    DriverNotFound(DriverId),

    #[error("Passenger not found with id: {0}")]
    PassengerNotFound(PassengerId),

    #[error("No ratings found for driver with id {0}")]
    NoRatingsForDriver(DriverId),

    #[error("Rating for this driver and passenger already exists.")]
    DuplicateRating {
        driver_id: DriverId,
        passenger_id: PassengerId,
    },

    /// One or more request fields failed validation.
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Cannot change trip status from {from} to {to}")]
    IllegalTransition { from: TripStatus, to: TripStatus },

    /// A remote owner of a referenced entity could not answer.
    #[error("{entity} service unavailable: {reason}")]
    DependencyUnavailable { entity: EntityKind, reason: String },

    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::TripNotFound(_)
            | DomainError::RatingNotFound(_)
            | DomainError::DriverNotFound(_)
            | DomainError::PassengerNotFound(_)
            | DomainError::NoRatingsForDriver(_) => ErrorKind::NotFound,
            DomainError::DuplicateRating { .. } => ErrorKind::Duplicate,
            DomainError::Validation(_) | DomainError::InvalidRequest(_) => {
                ErrorKind::InvalidRequest
            }
            DomainError::IllegalTransition { .. } => ErrorKind::Conflict,
            DomainError::DependencyUnavailable { .. } => ErrorKind::Unavailable,
            DomainError::Store(_) => ErrorKind::Internal,
        }
    }
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::TripNotFound(id) => DomainError::TripNotFound(id),
            StoreError::RatingNotFound(id) => DomainError::RatingNotFound(id),
            StoreError::DuplicateRating {
                driver_id,
                passenger_id,
            } => DomainError::DuplicateRating {
                driver_id,
                passenger_id,
            },
            other => DomainError::Store(other),
        }
    }
}

impl From<ValidationErrors> for DomainError {
    fn from(errors: ValidationErrors) -> Self {
        DomainError::Validation(errors)
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
