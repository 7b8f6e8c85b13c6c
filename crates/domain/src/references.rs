//! Checks that the driver and passenger of a write exist.

use common::{DriverId, PassengerId};
use verifier::{EntityKind, EntityVerifier, Verification};

use crate::error::{DomainError, Result};

/// Verifies the passenger, then the driver.
///
/// Stops at the first failure, so a request with two unknown ids reports
/// the passenger.
pub async fn verify_parties<V>(verifier: &V, passenger_id: PassengerId, driver_id: DriverId) -> Result<()>
where
    V: EntityVerifier + ?Sized,
{
    match verifier.verify_passenger(passenger_id).await {
        Verification::Found => {}
        Verification::NotFound => return Err(DomainError::PassengerNotFound(passenger_id)),
        Verification::Unavailable(reason) => {
            return Err(DomainError::DependencyUnavailable {
                entity: EntityKind::Passenger,
                reason,
            });
        }
    }

    match verifier.verify_driver(driver_id).await {
        Verification::Found => Ok(()),
        Verification::NotFound => Err(DomainError::DriverNotFound(driver_id)),
        Verification::Unavailable(reason) => Err(DomainError::DependencyUnavailable {
            entity: EntityKind::Driver,
            reason,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verifier::InMemoryDirectory;

    #[tokio::test]
    async fn passenger_is_checked_first() {
        let directory = InMemoryDirectory::new();
        let err = verify_parties(&directory, PassengerId::new(3), DriverId::new(4))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::PassengerNotFound(id) if id == PassengerId::new(3)));
        assert_eq!(directory.call_count(), 1);
    }

    #[tokio::test]
    async fn unknown_driver_is_reported() {
        let directory = InMemoryDirectory::new().with_passengers([3]);
        let err = verify_parties(&directory, PassengerId::new(3), DriverId::new(4))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::DriverNotFound(id) if id == DriverId::new(4)));
    }

    #[tokio::test]
    async fn outage_is_unavailable() {
        let directory = InMemoryDirectory::new().with_passengers([3]).with_drivers([4]);
        directory.set_unavailable(true);

        let err = verify_parties(&directory, PassengerId::new(3), DriverId::new(4))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::DependencyUnavailable {
                entity: EntityKind::Passenger,
                ..
            }
        ));
    }
}
