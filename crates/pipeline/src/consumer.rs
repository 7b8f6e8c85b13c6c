//! Turns rating events into ratings, at most one per driver and passenger.

use std::time::Duration;

use backon::Retryable;
use common::{Rating, RatingCreationEvent};
use domain::{DomainError, RatingService, RecordOutcome};
use futures_util::StreamExt;
use messaging::{Delivery, EventChannel};
use store::RatingRepository;
use tokio::sync::watch;
use verifier::{EntityVerifier, RetryPolicy};

use crate::error::ConsumerError;
use crate::{RATING_GROUP, RATING_TOPIC};

/// What handling one delivery did.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeOutcome {
    /// A new rating was stored.
    Inserted(Rating),
    /// The pair was already rated.
    Discarded,
    /// The payload could not be decoded.
    Skipped,
}

impl ConsumeOutcome {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumeOutcome::Inserted(_) => "inserted",
            ConsumeOutcome::Discarded => "discarded",
            ConsumeOutcome::Skipped => "skipped",
        }
    }
}

/// Settings for [`RatingEventConsumer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub topic: String,
    pub group: String,
    /// Retries of a storage failure before it stops the consumer.
    pub store_retry: RetryPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: RATING_TOPIC.to_string(),
            group: RATING_GROUP.to_string(),
            store_retry: RetryPolicy::new(3, Duration::from_millis(200)),
        }
    }
}

/// Subscribes to the rating topic and records each event as a rating.
///
/// A delivery is acknowledged only after its outcome is durable. Undecodable
/// payloads are acknowledged and skipped. A storage failure that outlasts
/// the retries stops the consumer without acknowledging, so the record is
/// delivered again after a restart.
pub struct RatingEventConsumer<S, V, C> {
    ratings: RatingService<S, V>,
    channel: C,
    config: ConsumerConfig,
}

impl<S, V, C> RatingEventConsumer<S, V, C>
where
    S: RatingRepository,
    V: EntityVerifier,
    C: EventChannel,
{
    pub fn new(ratings: RatingService<S, V>, channel: C, config: ConsumerConfig) -> Self {
        Self {
            ratings,
            channel,
            config,
        }
    }

    /// Decodes and records one payload. Never acknowledges.
    pub async fn handle(&self, payload: &[u8]) -> Result<ConsumeOutcome, ConsumerError> {
        let event = match RatingCreationEvent::from_bytes(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, payload_len = payload.len(), "Skipping undecodable rating event");
                return Ok(ConsumeOutcome::Skipped);
            }
        };

        let mut attempts = 0;
        let recorded = (|| {
            attempts += 1;
            self.ratings.record_from_event(event.clone())
        })
        .retry(self.config.store_retry.backoff())
        .when(|e| matches!(e, DomainError::Store(_)))
        .notify(|e: &DomainError, delay: Duration| {
            tracing::warn!(error = %e, backoff_ms = delay.as_millis() as u64, "Storing rating failed, retrying");
        })
        .await;

        match recorded {
            Ok(RecordOutcome::Inserted(rating)) => Ok(ConsumeOutcome::Inserted(rating)),
            Ok(RecordOutcome::AlreadyRated) => {
                tracing::debug!(
                    driver_id = %event.driver_id,
                    passenger_id = %event.passenger_id,
                    "Rating already exists, discarding event"
                );
                Ok(ConsumeOutcome::Discarded)
            }
            Err(source) => Err(ConsumerError::Storage { attempts, source }),
        }
    }

    /// Handles a delivery and acknowledges it once the outcome is durable.
    #[tracing::instrument(skip(self, delivery), fields(topic = %delivery.topic, partition = delivery.partition, offset = delivery.offset))]
    pub async fn process(&self, delivery: Delivery) -> Result<ConsumeOutcome, ConsumerError> {
        let outcome = self.handle(&delivery.payload).await?;
        metrics::counter!("rating_events_consumed_total", "outcome" => outcome.as_str()).increment(1);

        if let Err(e) = delivery.ack().await {
            // The record comes again and is discarded then.
            tracing::warn!(error = %e, "Failed to acknowledge delivery");
        }
        Ok(outcome)
    }

    /// Consumes until shutdown, the end of the subscription, or a fatal error.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        let mut deliveries = self
            .channel
            .subscribe(&self.config.topic, &self.config.group)
            .await
            .map_err(ConsumerError::Subscribe)?;
        tracing::info!(topic = %self.config.topic, group = %self.config.group, "Rating consumer started");

        while !*shutdown.borrow() {
            tokio::select! {
                next = deliveries.next() => {
                    match next {
                        Some(Ok(delivery)) => {
                            if let Err(e) = self.process(delivery).await {
                                tracing::error!(error = %e, "Rating consumer stopping, delivery left unacknowledged");
                                return Err(e);
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "Rating consumer stopping on channel error");
                            return Err(e.into());
                        }
                        None => {
                            tracing::info!("Subscription ended");
                            break;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Rating consumer stopped");
        Ok(())
    }
}
