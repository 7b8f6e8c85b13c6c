//! Remote entity verification.
//!
//! Drivers and passengers are owned by other services. Before a trip or a
//! rating is written, both ids are looked up through an [`EntityVerifier`].
//! A lookup can tell three things apart: the entity exists, it does not, or
//! the owning service could not answer. Only the second one is a client error.

pub mod error;
pub mod http;
pub mod memory;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use common::{DriverId, PassengerId};

pub use error::VerifierError;
pub use http::{HttpVerifier, HttpVerifierConfig};
pub use memory::InMemoryDirectory;
pub use retry::{RetryPolicy, Retrying};

/// Outcome of one existence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The owning service knows the id.
    Found,
    /// The owning service answered that the id does not exist.
    NotFound,
    /// The owning service could not be asked or gave no usable answer.
    Unavailable(String),
}

impl Verification {
    pub fn is_found(&self) -> bool {
        matches!(self, Verification::Found)
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Verification::Unavailable(_))
    }
}

/// Kind of remote entity, used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Driver,
    Passenger,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Driver => "driver",
            EntityKind::Passenger => "passenger",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Looks up drivers and passengers in the services that own them.
///
/// No results are cached; every call asks again.
#[async_trait]
pub trait EntityVerifier: Send + Sync {
    async fn verify_driver(&self, id: DriverId) -> Verification;

    async fn verify_passenger(&self, id: PassengerId) -> Verification;
}

#[async_trait]
impl<T: EntityVerifier + ?Sized> EntityVerifier for Arc<T> {
    async fn verify_driver(&self, id: DriverId) -> Verification {
        (**self).verify_driver(id).await
    }

    async fn verify_passenger(&self, id: PassengerId) -> Verification {
        (**self).verify_passenger(id).await
    }
}
