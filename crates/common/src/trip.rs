//! Trip record and its status enumeration.

use std::str::FromStr;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DriverId, PassengerId, TripId};

/// The status of a trip.
///
/// Legal lifecycle (only enforced when a strict status policy is configured):
/// ```text
/// Created ──► Accepted ──► EnRouteToPassenger ──► EnRouteToDestination ──► Completed
///    │            │
///    └────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    /// Trip has been ordered; both parties were verified.
    #[default]
    Created,

    /// A driver accepted the trip.
    Accepted,

    /// Driver is on the way to the pickup point.
    EnRouteToPassenger,

    /// Passenger is on board.
    EnRouteToDestination,

    /// Trip finished (terminal in the strict lifecycle).
    Completed,

    /// Trip was cancelled (terminal in the strict lifecycle).
    Cancelled,
}

impl TripStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [TripStatus; 6] = [
        TripStatus::Created,
        TripStatus::Accepted,
        TripStatus::EnRouteToPassenger,
        TripStatus::EnRouteToDestination,
        TripStatus::Completed,
        TripStatus::Cancelled,
    ];

    /// Returns true if the strict lifecycle allows moving from `self` to `next`.
    ///
    /// Re-asserting the current status is always allowed.
    pub fn can_transition_to(&self, next: TripStatus) -> bool {
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (TripStatus::Created, TripStatus::Accepted)
                | (TripStatus::Accepted, TripStatus::EnRouteToPassenger)
                | (TripStatus::EnRouteToPassenger, TripStatus::EnRouteToDestination)
                | (TripStatus::EnRouteToDestination, TripStatus::Completed)
                | (TripStatus::Created, TripStatus::Cancelled)
                | (TripStatus::Accepted, TripStatus::Cancelled)
        )
    }

    /// Returns true if no further transitions exist in the strict lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }

    /// Returns the wire/storage name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Created => "CREATED",
            TripStatus::Accepted => "ACCEPTED",
            TripStatus::EnRouteToPassenger => "EN_ROUTE_TO_PASSENGER",
            TripStatus::EnRouteToDestination => "EN_ROUTE_TO_DESTINATION",
            TripStatus::Completed => "COMPLETED",
            TripStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for TripStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a string names no trip status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown trip status '{0}'; expected one of CREATED, ACCEPTED, EN_ROUTE_TO_PASSENGER, EN_ROUTE_TO_DESTINATION, COMPLETED, CANCELLED")]
pub struct ParseTripStatusError(pub String);

impl FromStr for TripStatus {
    type Err = ParseTripStatusError;

    /// Parses a status name, ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        TripStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ParseTripStatusError(s.to_string()))
    }
}

/// A persisted trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: TripId,
    pub driver_id: DriverId,
    pub passenger_id: PassengerId,
    pub origin_address: String,
    pub destination_address: String,
    pub status: TripStatus,
    pub order_date_time: NaiveDateTime,
    pub price: Decimal,
}

/// Field values for a trip that has not been stored yet.
///
/// The store assigns the id; the status is always `Created`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrip {
    pub driver_id: DriverId,
    pub passenger_id: PassengerId,
    pub origin_address: String,
    pub destination_address: String,
    pub order_date_time: NaiveDateTime,
    pub price: Decimal,
}

impl NewTrip {
    /// Materializes the stored row for the given id.
    pub fn into_trip(self, id: TripId) -> Trip {
        Trip {
            id,
            driver_id: self.driver_id,
            passenger_id: self.passenger_id,
            origin_address: self.origin_address,
            destination_address: self.destination_address,
            status: TripStatus::Created,
            order_date_time: self.order_date_time,
            price: self.price,
        }
    }
}

/// Replacement field values for an existing trip. Status is left untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct TripUpdate {
    pub driver_id: DriverId,
    pub passenger_id: PassengerId,
    pub origin_address: String,
    pub destination_address: String,
    pub order_date_time: NaiveDateTime,
    pub price: Decimal,
}

impl TripUpdate {
    /// Applies the update to a trip in place.
    pub fn apply_to(&self, trip: &mut Trip) {
        trip.driver_id = self.driver_id;
        trip.passenger_id = self.passenger_id;
        trip.origin_address = self.origin_address.clone();
        trip.destination_address = self.destination_address.clone();
        trip.order_date_time = self.order_date_time;
        trip.price = self.price;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_created() {
        assert_eq!(TripStatus::default(), TripStatus::Created);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("completed".parse::<TripStatus>(), Ok(TripStatus::Completed));
        assert_eq!(
            "En_Route_To_Passenger".parse::<TripStatus>(),
            Ok(TripStatus::EnRouteToPassenger)
        );
        assert!("IN_PROGRESS".parse::<TripStatus>().is_err());
    }

    #[test]
    fn serializes_in_screaming_snake_case() {
        let json = serde_json::to_string(&TripStatus::EnRouteToDestination).unwrap();
        assert_eq!(json, "\"EN_ROUTE_TO_DESTINATION\"");
    }

    #[test]
    fn happy_path_transitions_are_legal() {
        let path = [
            TripStatus::Created,
            TripStatus::Accepted,
            TripStatus::EnRouteToPassenger,
            TripStatus::EnRouteToDestination,
            TripStatus::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn cancellation_only_before_pickup() {
        assert!(TripStatus::Created.can_transition_to(TripStatus::Cancelled));
        assert!(TripStatus::Accepted.can_transition_to(TripStatus::Cancelled));
        assert!(!TripStatus::EnRouteToPassenger.can_transition_to(TripStatus::Cancelled));
        assert!(!TripStatus::EnRouteToDestination.can_transition_to(TripStatus::Cancelled));
    }

    #[test]
    fn terminal_states_do_not_move() {
        for next in TripStatus::ALL {
            if next != TripStatus::Completed {
                assert!(!TripStatus::Completed.can_transition_to(next));
            }
            if next != TripStatus::Cancelled {
                assert!(!TripStatus::Cancelled.can_transition_to(next));
            }
        }
        assert!(TripStatus::Completed.is_terminal());
        assert!(TripStatus::Cancelled.is_terminal());
        assert!(!TripStatus::Accepted.is_terminal());
    }

    #[test]
    fn skipping_steps_is_illegal() {
        assert!(!TripStatus::Created.can_transition_to(TripStatus::Completed));
        assert!(!TripStatus::Accepted.can_transition_to(TripStatus::EnRouteToDestination));
    }
}
