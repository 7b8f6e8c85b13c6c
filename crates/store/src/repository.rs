use std::time::Duration;

use async_trait::async_trait;
use common::{
    DriverId, NewRating, NewTrip, Page, PageRequest, PassengerId, Rating, RatingId, RatingSortKey,
    Trip, TripId, TripSortKey, TripStatus, TripUpdate,
};

use crate::{OutboxEntry, OutboxId, RatingFilter, Result, TripFilter};

/// Derives the outbox entry from a trip inside the completing transaction.
pub type EntryBuilder = Box<dyn for<'a> FnOnce(&'a Trip) -> Result<OutboxEntry> + Send>;

/// Persistence for trip rows.
///
/// Concurrent writes to the same id are serialized by the backend only;
/// the last write wins.
#[async_trait]
pub trait TripRepository: Send + Sync {
    /// Inserts a trip in `Created` status and returns it with its new id.
    async fn create_trip(&self, trip: NewTrip) -> Result<Trip>;

    /// Loads a trip. Returns None if no row has this id.
    async fn find_trip(&self, id: TripId) -> Result<Option<Trip>>;

    /// Replaces the trip's fields, leaving its status untouched.
    async fn update_trip(&self, id: TripId, update: TripUpdate) -> Result<Trip>;

    /// Overwrites the trip's status without looking at the previous one.
    async fn set_trip_status(&self, id: TripId, status: TripStatus) -> Result<Trip>;

    /// Sets the trip to `Completed` and stores `entry` in the outbox, atomically.
    ///
    /// `build_entry` receives the trip as it is after the update, so the
    /// entry can be derived from the row read inside the same transaction.
    /// Either both writes are visible afterwards or neither is. A claim set
    /// on the built entry is stored with it.
    async fn complete_trip_with_outbox(
        &self,
        id: TripId,
        build_entry: EntryBuilder,
    ) -> Result<(Trip, OutboxEntry)>;

    /// Deletes a trip.
    async fn delete_trip(&self, id: TripId) -> Result<()>;

    /// Lists trips matching the filter, one page at a time.
    async fn query_trips(
        &self,
        filter: &TripFilter,
        page: &PageRequest<TripSortKey>,
    ) -> Result<Page<Trip>>;
}

/// Persistence for rating rows.
#[async_trait]
pub trait RatingRepository: Send + Sync {
    /// Inserts a rating.
    ///
    /// Fails with `DuplicateRating` if a rating for the same
    /// (driver, passenger) pair exists; the check and the insert are one
    /// atomic step.
    async fn insert_rating(&self, rating: NewRating) -> Result<Rating>;

    /// Loads a rating. Returns None if no row has this id.
    async fn find_rating(&self, id: RatingId) -> Result<Option<Rating>>;

    /// Replaces all fields of a rating.
    ///
    /// Fails with `DuplicateRating` if the new pair belongs to another rating.
    async fn update_rating(&self, id: RatingId, rating: NewRating) -> Result<Rating>;

    /// Deletes a rating.
    async fn delete_rating(&self, id: RatingId) -> Result<()>;

    /// Returns true if a rating exists for the pair.
    async fn rating_exists(&self, driver_id: DriverId, passenger_id: PassengerId) -> Result<bool>;

    /// Lists ratings matching the filter, one page at a time.
    async fn query_ratings(
        &self,
        filter: &RatingFilter,
        page: &PageRequest<RatingSortKey>,
    ) -> Result<Page<Rating>>;

    /// Mean score of all ratings for a driver. Returns None if there are none.
    async fn average_score_for_driver(&self, driver_id: DriverId) -> Result<Option<f64>>;
}

/// Access to outbox entries written by [`TripRepository::complete_trip_with_outbox`].
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Returns up to `limit` unpublished entries, oldest first, claimed or not.
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Claims up to `limit` unpublished entries nobody holds, oldest first.
    ///
    /// Each returned entry is held for `lease`. Until the lease runs out or
    /// the claim is released, no other caller gets it. Concurrent callers
    /// never receive the same entry.
    async fn claim_pending(&self, limit: usize, lease: Duration) -> Result<Vec<OutboxEntry>>;

    /// Loads an unpublished entry. Published entries may no longer be found.
    async fn find_outbox(&self, id: OutboxId) -> Result<Option<OutboxEntry>>;

    /// Records a confirmed publish and drops the claim. Marking twice is harmless.
    async fn mark_published(&self, id: OutboxId) -> Result<()>;

    /// Records a failed publish attempt and releases the claim.
    async fn record_publish_failure(&self, id: OutboxId, error: &str) -> Result<()>;

    /// Releases a claim without counting an attempt.
    async fn release_claim(&self, id: OutboxId) -> Result<()>;
}

/// A backend providing every repository.
pub trait Store: TripRepository + RatingRepository + OutboxRepository + Clone + 'static {}

impl<T> Store for T where T: TripRepository + RatingRepository + OutboxRepository + Clone + 'static {}
