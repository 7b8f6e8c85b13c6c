//! The record carried on the rating topic.

use serde::{Deserialize, Serialize};

use crate::types::{DriverId, PassengerId};

/// Request to create a rating, emitted once per trip closure.
///
/// Travels as camelCase JSON:
/// `{"driverId":1,"passengerId":1,"score":5.0,"comment":"Great trip!"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingCreationEvent {
    pub driver_id: DriverId,
    pub passenger_id: PassengerId,
    pub score: f64,
    #[serde(default)]
    pub comment: Option<String>,
}

impl RatingCreationEvent {
    /// Creates an event for the given pair.
    pub fn new(
        driver_id: DriverId,
        passenger_id: PassengerId,
        score: f64,
        comment: Option<String>,
    ) -> Self {
        Self {
            driver_id,
            passenger_id,
            score,
            comment,
        }
    }

    /// Partition key for the channel.
    ///
    /// Every event for one (driver, passenger) pair maps to the same key, so
    /// redeliveries of one logical rating stay ordered within a partition.
    pub fn partition_key(&self) -> String {
        format!("{}:{}", self.driver_id, self.passenger_id)
    }

    /// Encodes the event as its JSON wire form.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decodes the event from its JSON wire form.
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
