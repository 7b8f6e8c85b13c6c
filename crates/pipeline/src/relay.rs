//! Publishes outbox entries the closure path could not.

use std::time::Duration;

use messaging::EventChannel;
use store::{OutboxEntry, OutboxRepository, Result as StoreResult};
use tokio::sync::watch;

/// Settings for [`OutboxRelay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    /// Most entries claimed per poll.
    pub batch_size: usize,
    /// How long claimed entries are held before another pass may take them.
    pub claim_lease: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
            claim_lease: crate::DEFAULT_CLAIM_LEASE,
        }
    }
}

/// What one relay pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub failed: usize,
}

/// Polls the outbox and publishes pending entries in creation order.
///
/// Each pass claims its batch first, so entries held by a closing request or
/// by another relay are skipped. A pass stops at the first failed publish and
/// releases the rest of its batch, so later entries never overtake an earlier
/// one. An entry whose publish succeeded but whose mark failed is sent again
/// once its claim runs out.
#[derive(Clone)]
pub struct OutboxRelay<S, C> {
    store: S,
    channel: C,
    config: RelayConfig,
}

impl<S, C> OutboxRelay<S, C>
where
    S: OutboxRepository,
    C: EventChannel,
{
    pub fn new(store: S, channel: C, config: RelayConfig) -> Self {
        Self {
            store,
            channel,
            config,
        }
    }

    /// Runs one pass over the unclaimed pending entries.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> StoreResult<RelayReport> {
        let claimed = self
            .store
            .claim_pending(self.config.batch_size, self.config.claim_lease)
            .await?;
        let mut report = RelayReport::default();

        for (index, entry) in claimed.iter().enumerate() {
            match self
                .channel
                .publish(&entry.topic, &entry.key, &entry.payload)
                .await
            {
                Ok(receipt) => {
                    if let Err(e) = self.store.mark_published(entry.id).await {
                        self.release(&claimed[index + 1..]).await;
                        return Err(e);
                    }
                    metrics::counter!("outbox_published_total").increment(1);
                    tracing::info!(
                        outbox_id = %entry.id,
                        trip_id = %entry.trip_id,
                        topic = %entry.topic,
                        partition = receipt.partition,
                        offset = receipt.offset,
                        "Relayed outbox entry"
                    );
                    report.published += 1;
                }
                Err(e) => {
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    tracing::warn!(
                        outbox_id = %entry.id,
                        attempts = entry.attempts + 1,
                        error = %e,
                        "Outbox publish failed"
                    );
                    let recorded = self
                        .store
                        .record_publish_failure(entry.id, &e.to_string())
                        .await;
                    self.release(&claimed[index + 1..]).await;
                    recorded?;
                    report.failed += 1;
                    break;
                }
            }
        }

        Ok(report)
    }

    async fn release(&self, entries: &[OutboxEntry]) {
        for entry in entries {
            if let Err(e) = self.store.release_claim(entry.id).await {
                tracing::warn!(outbox_id = %entry.id, error = %e, "Failed to release outbox claim");
            }
        }
    }

    /// Polls until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            claim_lease_ms = self.config.claim_lease.as_millis() as u64,
            "Outbox relay started"
        );
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "Outbox relay pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Outbox relay stopped");
    }
}
