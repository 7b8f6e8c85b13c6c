//! Trip requests and the trip service.

use std::str::FromStr;

use chrono::{Local, NaiveDateTime};
use common::{
    DriverId, NewTrip, Page, PageRequest, PassengerId, Trip, TripId, TripSortKey, TripStatus,
    TripUpdate,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use store::{TripFilter, TripRepository};
use verifier::EntityVerifier;

use crate::error::{DomainError, Result};
use crate::references::verify_parties;
use crate::validation::{self, ValidationErrors};

/// Body of a trip create or update request.
///
/// Every field is optional at this level so missing values are reported
/// as validation errors instead of decode failures.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripRequest {
    pub driver_id: Option<i64>,
    pub passenger_id: Option<i64>,
    pub origin_address: Option<String>,
    pub destination_address: Option<String>,
    pub order_date_time: Option<NaiveDateTime>,
    pub price: Option<Decimal>,
}

impl TripRequest {
    /// Checks every field against `now` and returns the values to store.
    pub fn validate(&self, now: NaiveDateTime) -> std::result::Result<NewTrip, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let driver_id = validation::positive_id(&mut errors, "driverId", "Driver ID", self.driver_id);
        let passenger_id =
            validation::positive_id(&mut errors, "passengerId", "Passenger ID", self.passenger_id);
        let origin_address =
            validation::address(&mut errors, "originAddress", "Origin address", &self.origin_address);
        let destination_address = validation::address(
            &mut errors,
            "destinationAddress",
            "Destination address",
            &self.destination_address,
        );
        let order_date_time =
            validation::past_or_present(&mut errors, "orderDateTime", self.order_date_time, now);
        let price = validation::price(&mut errors, "price", self.price);

        errors.finish(|| NewTrip {
            driver_id: DriverId::new(driver_id),
            passenger_id: PassengerId::new(passenger_id),
            origin_address,
            destination_address,
            order_date_time,
            price,
        })
    }
}

fn into_update(trip: NewTrip) -> TripUpdate {
    TripUpdate {
        driver_id: trip.driver_id,
        passenger_id: trip.passenger_id,
        origin_address: trip.origin_address,
        destination_address: trip.destination_address,
        order_date_time: trip.order_date_time,
        price: trip.price,
    }
}

/// Parses a status name from a request, ignoring case.
pub fn parse_status(value: &str) -> Result<TripStatus> {
    value
        .parse::<TripStatus>()
        .map_err(|e| DomainError::InvalidRequest(e.to_string()))
}

/// How status changes are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusPolicy {
    /// Any status may be set from any status.
    #[default]
    Unrestricted,
    /// Only lifecycle transitions are allowed; see [`TripStatus::can_transition_to`].
    Strict,
}

impl StatusPolicy {
    pub fn check(&self, from: TripStatus, to: TripStatus) -> Result<()> {
        match self {
            StatusPolicy::Strict if !from.can_transition_to(to) => {
                Err(DomainError::IllegalTransition { from, to })
            }
            _ => Ok(()),
        }
    }
}

impl FromStr for StatusPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unrestricted" => Ok(StatusPolicy::Unrestricted),
            "strict" => Ok(StatusPolicy::Strict),
            other => Err(format!(
                "unknown status policy '{other}'; expected unrestricted or strict"
            )),
        }
    }
}

/// Trip operations: validation, remote verification and storage.
#[derive(Clone)]
pub struct TripService<S, V> {
    store: S,
    verifier: V,
    policy: StatusPolicy,
}

impl<S, V> TripService<S, V>
where
    S: TripRepository,
    V: EntityVerifier,
{
    pub fn new(store: S, verifier: V) -> Self {
        Self {
            store,
            verifier,
            policy: StatusPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: StatusPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> StatusPolicy {
        self.policy
    }

    /// Creates a trip in `Created` status once both parties are verified.
    #[tracing::instrument(skip(self))]
    pub async fn create_trip(&self, request: TripRequest) -> Result<Trip> {
        let new_trip = request.validate(now())?;
        verify_parties(&self.verifier, new_trip.passenger_id, new_trip.driver_id).await?;

        let trip = self.store.create_trip(new_trip).await?;
        metrics::counter!("trips_created_total").increment(1);
        tracing::info!(trip_id = %trip.id, driver_id = %trip.driver_id, passenger_id = %trip.passenger_id, "Trip created");
        Ok(trip)
    }

    /// Replaces a trip's fields after verifying both parties again.
    #[tracing::instrument(skip(self))]
    pub async fn update_trip(&self, id: TripId, request: TripRequest) -> Result<Trip> {
        let new_trip = request.validate(now())?;
        verify_parties(&self.verifier, new_trip.passenger_id, new_trip.driver_id).await?;

        Ok(self.store.update_trip(id, into_update(new_trip)).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_trip(&self, id: TripId) -> Result<Trip> {
        self.store
            .find_trip(id)
            .await?
            .ok_or(DomainError::TripNotFound(id))
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_trips(
        &self,
        filter: TripFilter,
        page: PageRequest<TripSortKey>,
    ) -> Result<Page<Trip>> {
        Ok(self.store.query_trips(&filter, &page).await?)
    }

    /// Sets a trip's status, subject to the configured policy.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(&self, id: TripId, status: &str) -> Result<Trip> {
        let status = parse_status(status)?;

        if self.policy == StatusPolicy::Strict {
            let current = self.get_trip(id).await?;
            self.policy.check(current.status, status)?;
        }

        let trip = self.store.set_trip_status(id, status).await?;
        tracing::info!(trip_id = %id, status = %status, "Trip status updated");
        Ok(trip)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_trip(&self, id: TripId) -> Result<()> {
        self.store.delete_trip(id).await?;
        tracing::info!(trip_id = %id, "Trip deleted");
        Ok(())
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}
