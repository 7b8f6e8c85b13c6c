//! Integration tests for the trip and rating services.
//!
//! Both services share one in-memory store and one directory, the way the
//! API wires them in a single-process deployment.

use chrono::NaiveDate;
use common::{DriverId, PageRequest, PassengerId, RatingSortKey, TripSortKey, TripStatus};
use domain::{
    DomainError, ErrorKind, RatingRequest, RatingService, StatusPolicy, TripRequest, TripService,
};
use rust_decimal::Decimal;
use store::{InMemoryStore, RatingFilter, TripFilter};
use verifier::{InMemoryDirectory, RetryPolicy, Retrying};

fn directory() -> InMemoryDirectory {
    InMemoryDirectory::new()
        .with_drivers([1, 2, 3])
        .with_passengers([1, 2, 3])
}

fn trip_request(driver: i64, passenger: i64, origin: &str) -> TripRequest {
    TripRequest {
        driver_id: Some(driver),
        passenger_id: Some(passenger),
        origin_address: Some(origin.to_string()),
        destination_address: Some("Central Station".to_string()),
        order_date_time: NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(9, 15, 0),
        price: Some(Decimal::new(1250, 2)),
    }
}

mod trips {
    use super::*;

    #[tokio::test]
    async fn trip_lifecycle_under_strict_policy() {
        let service =
            TripService::new(InMemoryStore::new(), directory()).with_policy(StatusPolicy::Strict);
        let trip = service
            .create_trip(trip_request(1, 2, "Harbour Road"))
            .await
            .unwrap();

        for status in [
            "ACCEPTED",
            "EN_ROUTE_TO_PASSENGER",
            "EN_ROUTE_TO_DESTINATION",
            "COMPLETED",
        ] {
            service.update_status(trip.id, status).await.unwrap();
        }

        let done = service.get_trip(trip.id).await.unwrap();
        assert_eq!(done.status, TripStatus::Completed);

        let err = service.update_status(trip.id, "CANCELLED").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn update_keeps_status_and_replaces_fields() {
        let service = TripService::new(InMemoryStore::new(), directory());
        let trip = service
            .create_trip(trip_request(1, 1, "Harbour Road"))
            .await
            .unwrap();
        service.update_status(trip.id, "ACCEPTED").await.unwrap();

        let updated = service
            .update_trip(trip.id, trip_request(2, 3, "Mill Lane"))
            .await
            .unwrap();
        assert_eq!(updated.status, TripStatus::Accepted);
        assert_eq!(updated.driver_id, DriverId::new(2));
        assert_eq!(updated.origin_address, "Mill Lane");
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let service = TripService::new(InMemoryStore::new(), directory());
        for origin in ["Harbour Road", "harbour view", "Mill Lane"] {
            service.create_trip(trip_request(1, 1, origin)).await.unwrap();
        }
        service.create_trip(trip_request(2, 1, "Harbour Road")).await.unwrap();

        let page = service
            .list_trips(
                TripFilter::new()
                    .driver_id(DriverId::new(1))
                    .origin_address("HARBOUR"),
                PageRequest::<TripSortKey>::parse(0, 1, "id,asc").unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(page.total_items, 2);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.content[0].origin_address, "Harbour Road");
    }

    #[tokio::test]
    async fn unknown_passenger_reported_before_unknown_driver() {
        let service = TripService::new(InMemoryStore::new(), InMemoryDirectory::new());
        let err = service
            .create_trip(trip_request(998, 999, "Harbour Road"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::PassengerNotFound(id) if id == PassengerId::new(999)));
    }

    #[tokio::test]
    async fn verifier_outage_is_unavailable_after_retries() {
        let directory = directory();
        directory.set_unavailable(true);
        let verifier = Retrying::new(
            directory,
            RetryPolicy::new(3, std::time::Duration::from_millis(1)),
        );
        let service = TripService::new(InMemoryStore::new(), verifier);

        let err = service
            .create_trip(trip_request(1, 1, "Harbour Road"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(service.store().trip_count().await, 0);
    }
}

mod ratings {
    use super::*;

    #[tokio::test]
    async fn list_by_driver_sorted_by_score() {
        let service = RatingService::new(InMemoryStore::new(), directory());
        service.create_rating(RatingRequest::new(1, 1, 3.0, None)).await.unwrap();
        service.create_rating(RatingRequest::new(1, 2, 5.0, None)).await.unwrap();
        service.create_rating(RatingRequest::new(2, 1, 1.0, None)).await.unwrap();

        let page = service
            .list_ratings(
                RatingFilter::new().driver_id(DriverId::new(1)),
                PageRequest::<RatingSortKey>::parse(0, 10, "score,desc").unwrap(),
            )
            .await
            .unwrap();

        let scores: Vec<f64> = page.content.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![5.0, 3.0]);
    }

    #[tokio::test]
    async fn validation_runs_before_verification() {
        let directory = directory();
        let service = RatingService::new(InMemoryStore::new(), directory.clone());

        let err = service
            .create_rating(RatingRequest::new(1, 1, 7.0, None))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref e) if e.get("score").is_some()));
        assert_eq!(directory.call_count(), 0);
    }
}
