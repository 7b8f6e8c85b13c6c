//! Close a trip and emit its rating event.

use std::time::{Duration, Instant};

use common::{RatingCreationEvent, Trip, TripId};
use domain::{DomainError, ScoreRequest};
use messaging::{EventChannel, PublishReceipt};
use store::{OutboxEntry, OutboxRepository, StoreError, TripRepository};

use crate::RATING_TOPIC;
use crate::error::ClosureError;

/// A successful close-and-rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    /// The trip as stored, now `Completed`.
    pub trip: Trip,
    /// The outbox entry carrying the rating event.
    pub entry: OutboxEntry,
    pub receipt: PublishReceipt,
}

/// Drives the close-and-rate use case.
///
/// The status change and the outbox entry are committed together; the event
/// is then published right away. The entry is written already claimed for
/// `claim_lease`, so a running [`crate::OutboxRelay`] leaves it alone until
/// this publish either succeeds or fails.
#[derive(Clone)]
pub struct ClosureOrchestrator<S, C> {
    store: S,
    channel: C,
    topic: String,
    claim_lease: Duration,
}

/// How long a freshly written entry is held for the inline publish.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(30);

impl<S, C> ClosureOrchestrator<S, C>
where
    S: TripRepository + OutboxRepository,
    C: EventChannel,
{
    pub fn new(store: S, channel: C) -> Self {
        Self {
            store,
            channel,
            topic: RATING_TOPIC.to_string(),
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Completes the trip and publishes a rating event for its driver and passenger.
    ///
    /// Closing a trip that is already completed is allowed and emits another
    /// event; the consumer discards it.
    #[tracing::instrument(skip(self, request), fields(trip_id = %trip_id))]
    pub async fn close_and_rate(
        &self,
        trip_id: TripId,
        request: ScoreRequest,
    ) -> Result<Closure, ClosureError> {
        let started = Instant::now();
        let (score, comment) = request.validate().map_err(DomainError::from)?;

        let topic = self.topic.clone();
        let lease = self.claim_lease;
        let (trip, entry) = self
            .store
            .complete_trip_with_outbox(
                trip_id,
                Box::new(move |trip: &Trip| {
                    let event = RatingCreationEvent::new(
                        trip.driver_id,
                        trip.passenger_id,
                        score,
                        comment,
                    );
                    OutboxEntry::for_rating(topic, trip.id, &event)
                        .map(|entry| entry.claimed_for(lease))
                        .map_err(StoreError::from)
                }),
            )
            .await?;

        metrics::counter!("trips_closed_total").increment(1);
        tracing::info!(
            driver_id = %trip.driver_id,
            passenger_id = %trip.passenger_id,
            outbox_id = %entry.id,
            "Trip completed"
        );

        let published = self
            .channel
            .publish(&entry.topic, &entry.key, &entry.payload)
            .await;
        metrics::histogram!("close_and_rate_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match published {
            Ok(receipt) => {
                if let Err(e) = self.store.mark_published(entry.id).await {
                    // Still claimed; the relay sends it again once the lease runs out
                    tracing::warn!(outbox_id = %entry.id, error = %e, "Failed to mark outbox entry published");
                }
                tracing::info!(
                    topic = %entry.topic,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    "Rating event published"
                );
                Ok(Closure {
                    trip,
                    entry,
                    receipt,
                })
            }
            Err(e) => {
                tracing::error!(outbox_id = %entry.id, error = %e, "Failed to publish rating event");
                metrics::counter!("outbox_publish_failures_total").increment(1);
                if let Err(store_err) = self.store.record_publish_failure(entry.id, &e.to_string()).await {
                    tracing::warn!(outbox_id = %entry.id, error = %store_err, "Failed to record publish failure");
                }
                Err(ClosureError::PublishFailed {
                    trip_id,
                    reason: e.to_string(),
                })
            }
        }
    }
}
