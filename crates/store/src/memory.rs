use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    DriverId, NewRating, NewTrip, Page, PageRequest, PassengerId, Rating, RatingId, RatingSortKey,
    SortDirection, Trip, TripId, TripSortKey, TripStatus, TripUpdate,
};
use tokio::sync::RwLock;

use crate::{
    EntryBuilder, OutboxEntry, OutboxId, RatingFilter, Result, StoreError, TripFilter,
    outbox::lease_deadline,
    repository::{OutboxRepository, RatingRepository, TripRepository},
};

#[derive(Debug, Default)]
struct State {
    trips: BTreeMap<TripId, Trip>,
    ratings: BTreeMap<RatingId, Rating>,
    /// Unpublished entries by sequence. Published ones are dropped.
    outbox: BTreeMap<i64, OutboxEntry>,
    outbox_sequences: HashMap<OutboxId, i64>,
    last_trip_id: i64,
    last_rating_id: i64,
    last_outbox_sequence: i64,
}

impl State {
    fn pair_taken(&self, driver_id: DriverId, passenger_id: PassengerId, except: Option<RatingId>) -> bool {
        self.ratings.values().any(|r| {
            r.driver_id == driver_id && r.passenger_id == passenger_id && Some(r.id) != except
        })
    }

    fn outbox_entry_mut(&mut self, id: OutboxId) -> Option<&mut OutboxEntry> {
        let sequence = self.outbox_sequences.get(&id)?;
        self.outbox.get_mut(sequence)
    }
}

/// In-memory store implementation for testing and single-process runs.
///
/// All tables live behind one lock, so multi-table writes such as completing
/// a trip together with its outbox entry are atomic, and the rating pair
/// check happens under the same write lock as the insert.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with a database error until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, AtomicOrdering::SeqCst);
    }

    /// Returns the total number of stored ratings.
    pub async fn rating_count(&self) -> usize {
        self.state.read().await.ratings.len()
    }

    /// Returns the number of ratings stored for one pair.
    pub async fn rating_count_for_pair(&self, driver_id: DriverId, passenger_id: PassengerId) -> usize {
        self.state
            .read()
            .await
            .ratings
            .values()
            .filter(|r| r.driver_id == driver_id && r.passenger_id == passenger_id)
            .count()
    }

    /// Returns the total number of stored trips.
    pub async fn trip_count(&self) -> usize {
        self.state.read().await.trips.len()
    }

    /// Returns every unpublished outbox entry in insertion order.
    pub async fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.state.read().await.outbox.values().cloned().collect()
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        *self.state.write().await = State::default();
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

fn paginate<T: Clone, K>(mut rows: Vec<T>, page: &PageRequest<K>, cmp: impl Fn(&T, &T) -> Ordering) -> Page<T> {
    rows.sort_by(|a, b| match page.direction {
        SortDirection::Asc => cmp(a, b),
        SortDirection::Desc => cmp(b, a),
    });
    let total = rows.len() as u64;
    let content = rows
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.size as usize)
        .collect();
    Page::new(content, page.page, page.size, total)
}

fn compare_trips(key: TripSortKey, a: &Trip, b: &Trip) -> Ordering {
    let primary = match key {
        TripSortKey::Id => Ordering::Equal,
        TripSortKey::DriverId => a.driver_id.cmp(&b.driver_id),
        TripSortKey::PassengerId => a.passenger_id.cmp(&b.passenger_id),
        TripSortKey::OriginAddress => a.origin_address.cmp(&b.origin_address),
        TripSortKey::DestinationAddress => a.destination_address.cmp(&b.destination_address),
        TripSortKey::Status => a.status.as_str().cmp(b.status.as_str()),
        TripSortKey::OrderDateTime => a.order_date_time.cmp(&b.order_date_time),
        TripSortKey::Price => a.price.cmp(&b.price),
    };
    primary.then(a.id.cmp(&b.id))
}

fn compare_ratings(key: RatingSortKey, a: &Rating, b: &Rating) -> Ordering {
    let primary = match key {
        RatingSortKey::Id => Ordering::Equal,
        RatingSortKey::DriverId => a.driver_id.cmp(&b.driver_id),
        RatingSortKey::PassengerId => a.passenger_id.cmp(&b.passenger_id),
        RatingSortKey::Score => a.score.total_cmp(&b.score),
    };
    primary.then(a.id.cmp(&b.id))
}

#[async_trait]
impl TripRepository for InMemoryStore {
    async fn create_trip(&self, trip: NewTrip) -> Result<Trip> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        state.last_trip_id += 1;
        let trip = trip.into_trip(TripId::new(state.last_trip_id));
        state.trips.insert(trip.id, trip.clone());
        Ok(trip)
    }

    async fn find_trip(&self, id: TripId) -> Result<Option<Trip>> {
        Ok(self.state.read().await.trips.get(&id).cloned())
    }

    async fn update_trip(&self, id: TripId, update: TripUpdate) -> Result<Trip> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let trip = state.trips.get_mut(&id).ok_or(StoreError::TripNotFound(id))?;
        update.apply_to(trip);
        Ok(trip.clone())
    }

    async fn set_trip_status(&self, id: TripId, status: TripStatus) -> Result<Trip> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let trip = state.trips.get_mut(&id).ok_or(StoreError::TripNotFound(id))?;
        trip.status = status;
        Ok(trip.clone())
    }

    async fn complete_trip_with_outbox(
        &self,
        id: TripId,
        build_entry: EntryBuilder,
    ) -> Result<(Trip, OutboxEntry)> {
        self.check_writable()?;
        let mut state = self.state.write().await;

        let mut completed = state.trips.get(&id).cloned().ok_or(StoreError::TripNotFound(id))?;
        completed.status = TripStatus::Completed;

        // Build before touching any table so a failure leaves no partial write
        let mut entry = build_entry(&completed)?;
        state.last_outbox_sequence += 1;
        entry.sequence = state.last_outbox_sequence;

        state.trips.insert(id, completed.clone());
        state.outbox_sequences.insert(entry.id, entry.sequence);
        state.outbox.insert(entry.sequence, entry.clone());
        Ok((completed, entry))
    }

    async fn delete_trip(&self, id: TripId) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        state
            .trips
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::TripNotFound(id))
    }

    async fn query_trips(
        &self,
        filter: &TripFilter,
        page: &PageRequest<TripSortKey>,
    ) -> Result<Page<Trip>> {
        let state = self.state.read().await;
        let rows: Vec<Trip> = state
            .trips
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        let key = page.sort;
        Ok(paginate(rows, page, |a, b| compare_trips(key, a, b)))
    }
}

#[async_trait]
impl RatingRepository for InMemoryStore {
    async fn insert_rating(&self, rating: NewRating) -> Result<Rating> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        if state.pair_taken(rating.driver_id, rating.passenger_id, None) {
            return Err(StoreError::DuplicateRating {
                driver_id: rating.driver_id,
                passenger_id: rating.passenger_id,
            });
        }
        state.last_rating_id += 1;
        let rating = rating.into_rating(RatingId::new(state.last_rating_id));
        state.ratings.insert(rating.id, rating.clone());
        Ok(rating)
    }

    async fn find_rating(&self, id: RatingId) -> Result<Option<Rating>> {
        Ok(self.state.read().await.ratings.get(&id).cloned())
    }

    async fn update_rating(&self, id: RatingId, rating: NewRating) -> Result<Rating> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        if !state.ratings.contains_key(&id) {
            return Err(StoreError::RatingNotFound(id));
        }
        if state.pair_taken(rating.driver_id, rating.passenger_id, Some(id)) {
            return Err(StoreError::DuplicateRating {
                driver_id: rating.driver_id,
                passenger_id: rating.passenger_id,
            });
        }
        let updated = rating.into_rating(id);
        state.ratings.insert(id, updated.clone());
        Ok(updated)
    }

    async fn delete_rating(&self, id: RatingId) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        state
            .ratings
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::RatingNotFound(id))
    }

    async fn rating_exists(&self, driver_id: DriverId, passenger_id: PassengerId) -> Result<bool> {
        Ok(self.state.read().await.pair_taken(driver_id, passenger_id, None))
    }

    async fn query_ratings(
        &self,
        filter: &RatingFilter,
        page: &PageRequest<RatingSortKey>,
    ) -> Result<Page<Rating>> {
        let state = self.state.read().await;
        let rows: Vec<Rating> = state
            .ratings
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        let key = page.sort;
        Ok(paginate(rows, page, |a, b| compare_ratings(key, a, b)))
    }

    async fn average_score_for_driver(&self, driver_id: DriverId) -> Result<Option<f64>> {
        let state = self.state.read().await;
        let (sum, count) = state
            .ratings
            .values()
            .filter(|r| r.driver_id == driver_id)
            .fold((0.0, 0u32), |(sum, count), r| (sum + r.score, count + 1));
        Ok((count > 0).then(|| sum / f64::from(count)))
    }
}

#[async_trait]
impl OutboxRepository for InMemoryStore {
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let state = self.state.read().await;
        Ok(state.outbox.values().take(limit).cloned().collect())
    }

    async fn claim_pending(&self, limit: usize, lease: Duration) -> Result<Vec<OutboxEntry>> {
        self.check_writable()?;
        let now = Utc::now();
        let until = lease_deadline(now, lease);
        let mut state = self.state.write().await;
        Ok(state
            .outbox
            .values_mut()
            .filter(|e| !e.is_claimed_at(now))
            .take(limit)
            .map(|e| {
                e.claimed_until = Some(until);
                e.clone()
            })
            .collect())
    }

    async fn find_outbox(&self, id: OutboxId) -> Result<Option<OutboxEntry>> {
        let state = self.state.read().await;
        Ok(state
            .outbox_sequences
            .get(&id)
            .and_then(|sequence| state.outbox.get(sequence))
            .cloned())
    }

    async fn mark_published(&self, id: OutboxId) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        if let Some(sequence) = state.outbox_sequences.remove(&id) {
            state.outbox.remove(&sequence);
        }
        Ok(())
    }

    async fn record_publish_failure(&self, id: OutboxId, error: &str) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let entry = state
            .outbox_entry_mut(id)
            .ok_or(StoreError::OutboxEntryNotFound(id))?;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        entry.claimed_until = None;
        Ok(())
    }

    async fn release_claim(&self, id: OutboxId) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        if let Some(entry) = state.outbox_entry_mut(id) {
            entry.claimed_until = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use common::RatingCreationEvent;
    use rust_decimal::Decimal;

    fn new_trip(driver: i64, passenger: i64, origin: &str) -> NewTrip {
        NewTrip {
            driver_id: DriverId::new(driver),
            passenger_id: PassengerId::new(passenger),
            origin_address: origin.to_string(),
            destination_address: "Central Station".to_string(),
            order_date_time: NaiveDate::from_ymd_opt(2024, 3, 10)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            price: Decimal::new(2550, 2),
        }
    }

    fn new_rating(driver: i64, passenger: i64, score: f64) -> NewRating {
        NewRating {
            driver_id: DriverId::new(driver),
            passenger_id: PassengerId::new(passenger),
            score,
            comment: None,
        }
    }

    fn rating_entry(trip: &Trip) -> Result<OutboxEntry> {
        let event = RatingCreationEvent::new(trip.driver_id, trip.passenger_id, 5.0, None);
        Ok(OutboxEntry::for_rating("rating-topic", trip.id, &event)?)
    }

    #[tokio::test]
    async fn create_trip_assigns_sequential_ids_in_created_status() {
        let store = InMemoryStore::new();
        let first = store.create_trip(new_trip(1, 2, "A")).await.unwrap();
        let second = store.create_trip(new_trip(1, 2, "B")).await.unwrap();

        assert_eq!(first.id, TripId::new(1));
        assert_eq!(second.id, TripId::new(2));
        assert_eq!(first.status, TripStatus::Created);
    }

    #[tokio::test]
    async fn set_status_overwrites_any_previous_status() {
        let store = InMemoryStore::new();
        let trip = store.create_trip(new_trip(1, 2, "A")).await.unwrap();

        store.set_trip_status(trip.id, TripStatus::Cancelled).await.unwrap();
        let back = store.set_trip_status(trip.id, TripStatus::Accepted).await.unwrap();
        assert_eq!(back.status, TripStatus::Accepted);
    }

    #[tokio::test]
    async fn update_missing_trip_is_not_found() {
        let store = InMemoryStore::new();
        let update = TripUpdate {
            driver_id: DriverId::new(1),
            passenger_id: PassengerId::new(1),
            origin_address: "A".to_string(),
            destination_address: "B".to_string(),
            order_date_time: Utc::now().naive_utc(),
            price: Decimal::ZERO,
        };
        let result = store.update_trip(TripId::new(99), update).await;
        assert!(matches!(result, Err(StoreError::TripNotFound(_))));
    }

    #[tokio::test]
    async fn complete_with_outbox_writes_both() {
        let store = InMemoryStore::new();
        let trip = store.create_trip(new_trip(3, 4, "A")).await.unwrap();

        let (completed, entry) = store
            .complete_trip_with_outbox(trip.id, Box::new(rating_entry))
            .await
            .unwrap();

        assert_eq!(completed.status, TripStatus::Completed);
        assert_eq!(entry.key, "3:4");
        assert_eq!(
            store.find_trip(trip.id).await.unwrap().unwrap().status,
            TripStatus::Completed
        );
        assert_eq!(store.pending_outbox(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_entry_build_leaves_trip_untouched() {
        let store = InMemoryStore::new();
        let trip = store.create_trip(new_trip(3, 4, "A")).await.unwrap();

        let result = store
            .complete_trip_with_outbox(
                trip.id,
                Box::new(|_: &Trip| Err(StoreError::CorruptRow("boom".to_string()))),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(
            store.find_trip(trip.id).await.unwrap().unwrap().status,
            TripStatus::Created
        );
        assert!(store.outbox_entries().await.is_empty());
    }

    #[tokio::test]
    async fn complete_missing_trip_writes_nothing() {
        let store = InMemoryStore::new();
        let result = store
            .complete_trip_with_outbox(TripId::new(5), Box::new(rating_entry))
            .await;
        assert!(matches!(result, Err(StoreError::TripNotFound(_))));
        assert!(store.outbox_entries().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_pair_is_rejected_on_insert() {
        let store = InMemoryStore::new();
        store.insert_rating(new_rating(1, 2, 4.0)).await.unwrap();

        let result = store.insert_rating(new_rating(1, 2, 3.0)).await;
        assert!(matches!(result, Err(StoreError::DuplicateRating { .. })));
        assert_eq!(store.rating_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_inserts_for_one_pair_store_exactly_one() {
        let store = InMemoryStore::new();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.insert_rating(new_rating(7, 8, 5.0)).await })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(
            store.rating_count_for_pair(DriverId::new(7), PassengerId::new(8)).await,
            1
        );
    }

    #[tokio::test]
    async fn update_rating_onto_taken_pair_is_duplicate() {
        let store = InMemoryStore::new();
        store.insert_rating(new_rating(1, 1, 4.0)).await.unwrap();
        let other = store.insert_rating(new_rating(1, 2, 4.0)).await.unwrap();

        let result = store.update_rating(other.id, new_rating(1, 1, 2.0)).await;
        assert!(matches!(result, Err(StoreError::DuplicateRating { .. })));

        // Keeping its own pair is fine
        let same = store.update_rating(other.id, new_rating(1, 2, 2.0)).await.unwrap();
        assert_eq!(same.score, 2.0);
    }

    #[tokio::test]
    async fn average_score_for_driver() {
        let store = InMemoryStore::new();
        store.insert_rating(new_rating(1, 1, 5.0)).await.unwrap();
        store.insert_rating(new_rating(1, 2, 4.0)).await.unwrap();
        store.insert_rating(new_rating(2, 1, 1.0)).await.unwrap();

        let avg = store.average_score_for_driver(DriverId::new(1)).await.unwrap();
        assert_eq!(avg, Some(4.5));
        let none = store.average_score_for_driver(DriverId::new(3)).await.unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn query_trips_filters_sorts_and_pages() {
        let store = InMemoryStore::new();
        store.create_trip(new_trip(1, 1, "North Gate")).await.unwrap();
        store.create_trip(new_trip(1, 2, "south gate")).await.unwrap();
        store.create_trip(new_trip(2, 1, "Gateway Mall")).await.unwrap();
        store.create_trip(new_trip(1, 3, "Harbour")).await.unwrap();

        let filter = TripFilter::new().driver_id(DriverId::new(1)).origin_address("GATE");
        let page = PageRequest::<TripSortKey>::parse(0, 1, "id,desc").unwrap();
        let result = store.query_trips(&filter, &page).await.unwrap();

        assert_eq!(result.total_items, 2);
        assert_eq!(result.total_pages, 2);
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.content[0].origin_address, "south gate");
    }

    #[tokio::test]
    async fn query_ratings_by_passenger() {
        let store = InMemoryStore::new();
        store.insert_rating(new_rating(1, 1, 5.0)).await.unwrap();
        store.insert_rating(new_rating(2, 1, 3.0)).await.unwrap();
        store.insert_rating(new_rating(2, 2, 4.0)).await.unwrap();

        let page = PageRequest::<RatingSortKey>::parse(0, 10, "score,asc").unwrap();
        let result = store
            .query_ratings(&RatingFilter::new().passenger_id(PassengerId::new(1)), &page)
            .await
            .unwrap();
        let scores: Vec<f64> = result.content.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![3.0, 5.0]);
    }

    #[tokio::test]
    async fn mark_published_removes_entry_from_pending() {
        let store = InMemoryStore::new();
        let trip = store.create_trip(new_trip(1, 2, "A")).await.unwrap();
        let (_, entry) = store
            .complete_trip_with_outbox(trip.id, Box::new(rating_entry))
            .await
            .unwrap();

        store.record_publish_failure(entry.id, "broker down").await.unwrap();
        let pending = store.pending_outbox(10).await.unwrap();
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("broker down"));

        store.mark_published(entry.id).await.unwrap();
        assert!(store.pending_outbox(10).await.unwrap().is_empty());
        assert!(store.find_outbox(entry.id).await.unwrap().is_none());
        assert!(store.outbox_entries().await.is_empty());

        // A second mark is a no-op
        store.mark_published(entry.id).await.unwrap();
    }

    #[tokio::test]
    async fn claimed_entries_are_handed_out_once() {
        let store = InMemoryStore::new();
        for passenger in 1..=3 {
            let trip = store.create_trip(new_trip(1, passenger, "A")).await.unwrap();
            store
                .complete_trip_with_outbox(trip.id, Box::new(rating_entry))
                .await
                .unwrap();
        }

        let first = store.claim_pending(2, Duration::from_secs(30)).await.unwrap();
        let second = store.claim_pending(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert!(first[0].sequence < first[1].sequence);
        assert!(first.iter().all(|e| e.id != second[0].id));
        assert!(store.claim_pending(10, Duration::from_secs(30)).await.unwrap().is_empty());

        // Still listed as pending until published
        assert_eq!(store.pending_outbox(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn entry_built_with_a_claim_is_not_handed_out() {
        let store = InMemoryStore::new();
        let trip = store.create_trip(new_trip(1, 2, "A")).await.unwrap();
        let (_, entry) = store
            .complete_trip_with_outbox(
                trip.id,
                Box::new(|t: &Trip| -> Result<OutboxEntry> {
                    Ok(rating_entry(t)?.claimed_for(Duration::from_secs(30)))
                }),
            )
            .await
            .unwrap();

        assert!(store.claim_pending(10, Duration::from_secs(30)).await.unwrap().is_empty());

        store.release_claim(entry.id).await.unwrap();
        let claimed = store.claim_pending(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, entry.id);
    }

    #[tokio::test]
    async fn failure_and_expiry_release_the_claim() {
        let store = InMemoryStore::new();
        let trip = store.create_trip(new_trip(1, 2, "A")).await.unwrap();
        let (_, entry) = store
            .complete_trip_with_outbox(trip.id, Box::new(rating_entry))
            .await
            .unwrap();

        store.claim_pending(10, Duration::from_secs(30)).await.unwrap();
        store.record_publish_failure(entry.id, "broker down").await.unwrap();
        assert_eq!(store.claim_pending(10, Duration::ZERO).await.unwrap().len(), 1);

        // A zero lease has already run out
        let again = store.claim_pending(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].attempts, 1);
    }

    #[tokio::test]
    async fn failing_writes_surface_as_database_errors() {
        let store = InMemoryStore::new();
        store.set_fail_writes(true);
        let result = store.insert_rating(new_rating(1, 1, 5.0)).await;
        assert!(matches!(result, Err(StoreError::Database(_))));

        store.set_fail_writes(false);
        assert!(store.insert_rating(new_rating(1, 1, 5.0)).await.is_ok());
    }
}
