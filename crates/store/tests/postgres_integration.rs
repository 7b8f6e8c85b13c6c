//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and need a Docker daemon.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --ignored
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use common::{
    DriverId, NewRating, NewTrip, PageRequest, PassengerId, RatingCreationEvent, RatingSortKey,
    Trip, TripSortKey, TripStatus,
};
use rust_decimal::Decimal;
use serial_test::serial;
use sqlx::PgPool;
use store::{
    OutboxEntry, OutboxRepository, PostgresStore, RatingFilter, RatingRepository, StoreError,
    TripFilter, TripRepository,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_trips_ratings_outbox.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/002_outbox_claims.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE trips, ratings, rating_outbox RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

fn new_trip(driver: i64, passenger: i64, origin: &str) -> NewTrip {
    NewTrip {
        driver_id: DriverId::new(driver),
        passenger_id: PassengerId::new(passenger),
        origin_address: origin.to_string(),
        destination_address: "Airport".to_string(),
        order_date_time: NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap(),
        price: Decimal::new(1999, 2),
    }
}

fn new_rating(driver: i64, passenger: i64, score: f64) -> NewRating {
    NewRating {
        driver_id: DriverId::new(driver),
        passenger_id: PassengerId::new(passenger),
        score,
        comment: Some("Smooth ride".to_string()),
    }
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn create_and_find_trip() {
    let store = get_test_store().await;

    let created = store.create_trip(new_trip(1, 2, "Main St 1")).await.unwrap();
    assert_eq!(created.status, TripStatus::Created);
    assert_eq!(created.price, Decimal::new(1999, 2));

    let found = store.find_trip(created.id).await.unwrap().unwrap();
    assert_eq!(found, created);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn complete_trip_commits_status_and_outbox_together() {
    let store = get_test_store().await;
    let trip = store.create_trip(new_trip(1, 1, "Main St 1")).await.unwrap();

    let (completed, entry) = store
        .complete_trip_with_outbox(
            trip.id,
            Box::new(|t: &Trip| -> store::Result<OutboxEntry> {
                let event = RatingCreationEvent::new(
                    t.driver_id,
                    t.passenger_id,
                    5.0,
                    Some("Great trip!".to_string()),
                );
                Ok(OutboxEntry::for_rating("rating-topic", t.id, &event)?)
            }),
        )
        .await
        .unwrap();

    assert_eq!(completed.status, TripStatus::Completed);
    assert!(entry.sequence > 0);

    let pending = store.pending_outbox(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, entry.id);
    assert_eq!(pending[0].key, "1:1");

    store.mark_published(entry.id).await.unwrap();
    assert!(store.pending_outbox(10).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn completing_missing_trip_leaves_outbox_empty() {
    let store = get_test_store().await;

    let result = store
        .complete_trip_with_outbox(
            common::TripId::new(404),
            Box::new(|t: &Trip| -> store::Result<OutboxEntry> {
                let event = RatingCreationEvent::new(t.driver_id, t.passenger_id, 5.0, None);
                Ok(OutboxEntry::for_rating("rating-topic", t.id, &event)?)
            }),
        )
        .await;

    assert!(matches!(result, Err(StoreError::TripNotFound(_))));
    assert!(store.pending_outbox(10).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn concurrent_claims_never_share_an_entry() {
    let store = get_test_store().await;
    for passenger in 1..=20 {
        let trip = store.create_trip(new_trip(1, passenger, "Main St 1")).await.unwrap();
        store
            .complete_trip_with_outbox(
                trip.id,
                Box::new(|t: &Trip| -> store::Result<OutboxEntry> {
                    let event = RatingCreationEvent::new(t.driver_id, t.passenger_id, 4.0, None);
                    Ok(OutboxEntry::for_rating("rating-topic", t.id, &event)?)
                }),
            )
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.claim_pending(8, Duration::from_secs(30)).await.unwrap()
        }));
    }

    let mut claimed = HashSet::new();
    for handle in handles {
        for entry in handle.await.unwrap() {
            assert!(entry.claimed_until.is_some());
            assert!(claimed.insert(entry.id), "entry claimed twice");
        }
    }
    assert_eq!(claimed.len(), 20);
    assert!(store.claim_pending(10, Duration::from_secs(30)).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn entry_inserted_with_claim_waits_for_release() {
    let store = get_test_store().await;
    let trip = store.create_trip(new_trip(1, 1, "Main St 1")).await.unwrap();

    let (_, entry) = store
        .complete_trip_with_outbox(
            trip.id,
            Box::new(|t: &Trip| -> store::Result<OutboxEntry> {
                let event = RatingCreationEvent::new(t.driver_id, t.passenger_id, 5.0, None);
                Ok(OutboxEntry::for_rating("rating-topic", t.id, &event)?
                    .claimed_for(Duration::from_secs(30)))
            }),
        )
        .await
        .unwrap();

    assert!(store.claim_pending(10, Duration::from_secs(30)).await.unwrap().is_empty());

    store.record_publish_failure(entry.id, "broker down").await.unwrap();
    let claimed = store.claim_pending(10, Duration::from_secs(30)).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].attempts, 1);

    store.mark_published(entry.id).await.unwrap();
    let published = store.find_outbox(entry.id).await.unwrap().unwrap();
    assert!(published.is_published());
    assert!(published.claimed_until.is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn unique_pair_constraint_maps_to_duplicate() {
    let store = get_test_store().await;

    store.insert_rating(new_rating(5, 6, 4.0)).await.unwrap();
    let result = store.insert_rating(new_rating(5, 6, 2.0)).await;

    assert!(matches!(result, Err(StoreError::DuplicateRating { .. })));
    assert!(
        store
            .rating_exists(DriverId::new(5), PassengerId::new(6))
            .await
            .unwrap()
    );
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn concurrent_inserts_store_one_rating_per_pair() {
    let store = get_test_store().await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.insert_rating(new_rating(9, 9, 5.0)).await })
        })
        .collect();

    let mut inserted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);

    let page = store
        .query_ratings(
            &RatingFilter::for_pair(DriverId::new(9), PassengerId::new(9)),
            &PageRequest::<RatingSortKey>::default(),
        )
        .await
        .unwrap();
    assert_eq!(page.total_items, 1);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn query_trips_with_filter_sort_and_paging() {
    let store = get_test_store().await;
    store.create_trip(new_trip(1, 1, "Baker Street 1")).await.unwrap();
    store.create_trip(new_trip(1, 2, "baker street 2")).await.unwrap();
    store.create_trip(new_trip(1, 3, "Oxford Road")).await.unwrap();
    store.create_trip(new_trip(2, 1, "100% Lane")).await.unwrap();

    let filter = TripFilter::new().driver_id(DriverId::new(1)).origin_address("BAKER");
    let page = PageRequest::<TripSortKey>::parse(0, 1, "passengerId,desc").unwrap();
    let result = store.query_trips(&filter, &page).await.unwrap();

    assert_eq!(result.total_items, 2);
    assert_eq!(result.total_pages, 2);
    assert_eq!(result.content[0].passenger_id, PassengerId::new(2));

    // Wildcards in user input match literally
    let literal = TripFilter::new().origin_address("0%");
    let result = store
        .query_trips(&literal, &PageRequest::default())
        .await
        .unwrap();
    assert_eq!(result.total_items, 1);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn average_score_over_driver_ratings() {
    let store = get_test_store().await;
    store.insert_rating(new_rating(3, 1, 5.0)).await.unwrap();
    store.insert_rating(new_rating(3, 2, 3.0)).await.unwrap();

    let avg = store.average_score_for_driver(DriverId::new(3)).await.unwrap();
    assert_eq!(avg, Some(4.0));
    assert_eq!(
        store.average_score_for_driver(DriverId::new(4)).await.unwrap(),
        None
    );
}
