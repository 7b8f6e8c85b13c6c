//! Rating requests and the rating service.

use common::{
    DriverId, NewRating, Page, PageRequest, PassengerId, Rating, RatingCreationEvent, RatingId,
    RatingSortKey,
};
use serde::Deserialize;
use store::{RatingFilter, RatingRepository, StoreError};
use verifier::EntityVerifier;

use crate::error::{DomainError, Result};
use crate::references::verify_parties;
use crate::validation::{self, ValidationErrors};

/// A score with an optional comment, as supplied when closing a trip.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScoreRequest {
    pub score: Option<f64>,
    pub comment: Option<String>,
}

impl ScoreRequest {
    pub fn new(score: f64, comment: Option<String>) -> Self {
        Self {
            score: Some(score),
            comment,
        }
    }

    /// Returns the checked score and comment.
    pub fn validate(&self) -> std::result::Result<(f64, Option<String>), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let score = validation::score(&mut errors, self.score);
        let comment = validation::comment(&mut errors, &self.comment);
        errors.finish(|| (score, comment))
    }
}

/// Body of a rating create or update request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingRequest {
    pub driver_id: Option<i64>,
    pub passenger_id: Option<i64>,
    pub score: Option<f64>,
    pub comment: Option<String>,
}

impl RatingRequest {
    pub fn new(driver_id: i64, passenger_id: i64, score: f64, comment: Option<&str>) -> Self {
        Self {
            driver_id: Some(driver_id),
            passenger_id: Some(passenger_id),
            score: Some(score),
            comment: comment.map(str::to_string),
        }
    }

    pub fn validate(&self) -> std::result::Result<NewRating, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let driver_id = validation::positive_id(&mut errors, "driverId", "Driver ID", self.driver_id);
        let passenger_id =
            validation::positive_id(&mut errors, "passengerId", "Passenger ID", self.passenger_id);
        let score = validation::score(&mut errors, self.score);
        let comment = validation::comment(&mut errors, &self.comment);

        errors.finish(|| NewRating {
            driver_id: DriverId::new(driver_id),
            passenger_id: PassengerId::new(passenger_id),
            score,
            comment,
        })
    }
}

/// Result of recording a rating that arrived as an event.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Inserted(Rating),
    /// The pair was already rated; nothing was written.
    AlreadyRated,
}

/// Rating operations: validation, remote verification and storage.
#[derive(Clone)]
pub struct RatingService<S, V> {
    store: S,
    verifier: V,
}

impl<S, V> RatingService<S, V>
where
    S: RatingRepository,
    V: EntityVerifier,
{
    pub fn new(store: S, verifier: V) -> Self {
        Self { store, verifier }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates a rating for a verified, not yet rated pair.
    #[tracing::instrument(skip(self))]
    pub async fn create_rating(&self, request: RatingRequest) -> Result<Rating> {
        let new_rating = request.validate()?;
        verify_parties(&self.verifier, new_rating.passenger_id, new_rating.driver_id).await?;

        if self
            .store
            .rating_exists(new_rating.driver_id, new_rating.passenger_id)
            .await?
        {
            return Err(DomainError::DuplicateRating {
                driver_id: new_rating.driver_id,
                passenger_id: new_rating.passenger_id,
            });
        }

        let rating = self.store.insert_rating(new_rating).await?;
        metrics::counter!("ratings_created_total").increment(1);
        tracing::info!(rating_id = %rating.id, driver_id = %rating.driver_id, passenger_id = %rating.passenger_id, "Rating created");
        Ok(rating)
    }

    /// Replaces every field of a rating. Both parties are verified again.
    #[tracing::instrument(skip(self))]
    pub async fn update_rating(&self, id: RatingId, request: RatingRequest) -> Result<Rating> {
        let new_rating = request.validate()?;
        verify_parties(&self.verifier, new_rating.passenger_id, new_rating.driver_id).await?;

        Ok(self.store.update_rating(id, new_rating).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_rating(&self, id: RatingId) -> Result<Rating> {
        self.store
            .find_rating(id)
            .await?
            .ok_or(DomainError::RatingNotFound(id))
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_ratings(
        &self,
        filter: RatingFilter,
        page: PageRequest<RatingSortKey>,
    ) -> Result<Page<Rating>> {
        Ok(self.store.query_ratings(&filter, &page).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn average_score(&self, driver_id: DriverId) -> Result<f64> {
        self.store
            .average_score_for_driver(driver_id)
            .await?
            .ok_or(DomainError::NoRatingsForDriver(driver_id))
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_rating(&self, id: RatingId) -> Result<()> {
        self.store.delete_rating(id).await?;
        tracing::info!(rating_id = %id, "Rating deleted");
        Ok(())
    }

    /// Stores the rating carried by an event unless the pair is already rated.
    ///
    /// Parties are not verified here; they were verified when the trip was
    /// created. Losing an insert race to a concurrent delivery counts as
    /// already rated.
    #[tracing::instrument(skip(self, event), fields(driver_id = %event.driver_id, passenger_id = %event.passenger_id))]
    pub async fn record_from_event(&self, event: RatingCreationEvent) -> Result<RecordOutcome> {
        if self
            .store
            .rating_exists(event.driver_id, event.passenger_id)
            .await?
        {
            tracing::debug!("Pair already rated, discarding event");
            return Ok(RecordOutcome::AlreadyRated);
        }

        match self.store.insert_rating(NewRating::from(event)).await {
            Ok(rating) => {
                metrics::counter!("ratings_created_total").increment(1);
                tracing::info!(rating_id = %rating.id, "Rating recorded from event");
                Ok(RecordOutcome::Inserted(rating))
            }
            Err(StoreError::DuplicateRating { .. }) => {
                tracing::debug!("Concurrent insert won, discarding event");
                Ok(RecordOutcome::AlreadyRated)
            }
            Err(e) => Err(e.into()),
        }
    }
}
