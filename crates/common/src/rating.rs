//! Rating record.

use serde::{Deserialize, Serialize};

use crate::event::RatingCreationEvent;
use crate::types::{DriverId, PassengerId, RatingId};

/// A persisted driver/passenger rating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub id: RatingId,
    pub driver_id: DriverId,
    pub passenger_id: PassengerId,
    pub score: f64,
    pub comment: Option<String>,
}

/// Field values for a rating that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRating {
    pub driver_id: DriverId,
    pub passenger_id: PassengerId,
    pub score: f64,
    pub comment: Option<String>,
}

impl NewRating {
    /// Materializes the stored row for the given id.
    pub fn into_rating(self, id: RatingId) -> Rating {
        Rating {
            id,
            driver_id: self.driver_id,
            passenger_id: self.passenger_id,
            score: self.score,
            comment: self.comment,
        }
    }
}

impl From<RatingCreationEvent> for NewRating {
    fn from(event: RatingCreationEvent) -> Self {
        Self {
            driver_id: event.driver_id,
            passenger_id: event.passenger_id,
            score: event.score,
            comment: event.comment,
        }
    }
}
