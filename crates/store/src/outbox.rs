//! Outbox entries: rating events committed alongside a trip's completion and
//! published to the channel afterwards.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::{RatingCreationEvent, TripId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(Uuid);

impl OutboxId {
    /// Creates a new random outbox ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an outbox ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message waiting to be (or already) published.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: OutboxId,
    /// Monotonic insertion position; pending entries are relayed in this order.
    pub sequence: i64,
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub trip_id: TripId,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
    /// Set while a publisher holds the entry; others skip it until then.
    pub claimed_until: Option<DateTime<Utc>>,
}

/// End of a lease of length `lease` starting at `now`.
pub fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(lease)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl OutboxEntry {
    /// Builds a pending entry for a rating event produced by closing `trip_id`.
    pub fn for_rating(
        topic: impl Into<String>,
        trip_id: TripId,
        event: &RatingCreationEvent,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            id: OutboxId::new(),
            sequence: 0,
            topic: topic.into(),
            key: event.partition_key(),
            payload: event.to_bytes()?,
            trip_id,
            created_at: Utc::now(),
            published_at: None,
            attempts: 0,
            last_error: None,
            claimed_until: None,
        })
    }

    /// Returns the entry held by its creator for `lease`.
    pub fn claimed_for(mut self, lease: Duration) -> Self {
        self.claimed_until = Some(lease_deadline(Utc::now(), lease));
        self
    }

    /// Returns true if a claim on the entry is still running at `now`.
    pub fn is_claimed_at(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.is_some_and(|until| until > now)
    }

    /// Returns true once a publish has been confirmed.
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// Decodes the payload back into the rating event.
    pub fn rating_event(&self) -> serde_json::Result<RatingCreationEvent> {
        RatingCreationEvent::from_bytes(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{DriverId, PassengerId};

    #[test]
    fn entry_carries_key_and_payload_of_the_event() {
        let event = RatingCreationEvent::new(
            DriverId::new(1),
            PassengerId::new(2),
            4.5,
            Some("Great ride!".to_string()),
        );
        let entry = OutboxEntry::for_rating("rating-topic", TripId::new(9), &event).unwrap();

        assert_eq!(entry.topic, "rating-topic");
        assert_eq!(entry.key, "1:2");
        assert_eq!(entry.trip_id, TripId::new(9));
        assert!(!entry.is_published());
        assert_eq!(entry.rating_event().unwrap(), event);
        assert!(!entry.is_claimed_at(Utc::now()));
    }

    #[test]
    fn claim_expires_after_its_lease() {
        let event = RatingCreationEvent::new(DriverId::new(1), PassengerId::new(1), 5.0, None);
        let entry = OutboxEntry::for_rating("rating-topic", TripId::new(1), &event)
            .unwrap()
            .claimed_for(Duration::from_secs(30));

        let now = Utc::now();
        assert!(entry.is_claimed_at(now));
        assert!(!entry.is_claimed_at(now + TimeDelta::seconds(31)));
    }

    #[test]
    fn huge_lease_saturates() {
        let now = Utc::now();
        assert_eq!(lease_deadline(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
