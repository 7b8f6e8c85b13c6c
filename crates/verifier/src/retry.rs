//! Bounded retries for unavailable lookups.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use common::{DriverId, PassengerId};

use crate::{EntityKind, EntityVerifier, Verification};

/// How often and how patiently a failing call is retried.
///
/// Delays start at `initial_backoff`, double on each retry and never exceed
/// `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff: initial_backoff.max(Self::default().max_backoff),
            ..Self::default()
        }
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Backoff for the retries after the first attempt.
    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff.max(self.initial_backoff))
            .with_factor(2.0)
            .with_max_times(self.max_attempts.max(1) as usize - 1);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Retries `Unavailable` outcomes of an inner verifier.
///
/// `Found` and `NotFound` are definitive and returned at once.
#[derive(Debug, Clone)]
pub struct Retrying<V> {
    inner: V,
    policy: RetryPolicy,
}

impl<V: EntityVerifier> Retrying<V> {
    pub fn new(inner: V, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &V {
        &self.inner
    }

    async fn run<F, Fut>(&self, kind: EntityKind, id: i64, lookup: F) -> Verification
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Verification> + Send,
    {
        let outcome = (|| async {
            match lookup().await {
                Verification::Unavailable(reason) => Err(reason),
                definitive => Ok(definitive),
            }
        })
        .retry(self.policy.backoff())
        .notify(|reason: &String, delay: Duration| {
            tracing::warn!(
                entity = %kind,
                id,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Lookup unavailable, retrying"
            );
        })
        .await;

        outcome.unwrap_or_else(|reason| {
            metrics::counter!("verifier_unavailable_total", "entity" => kind.as_str()).increment(1);
            tracing::error!(
                entity = %kind,
                id,
                attempts = self.policy.max_attempts.max(1),
                reason = %reason,
                "Lookup still unavailable, giving up"
            );
            Verification::Unavailable(reason)
        })
    }
}

#[async_trait]
impl<V: EntityVerifier> EntityVerifier for Retrying<V> {
    async fn verify_driver(&self, id: DriverId) -> Verification {
        self.run(EntityKind::Driver, id.as_i64(), || self.inner.verify_driver(id))
            .await
    }

    async fn verify_passenger(&self, id: PassengerId) -> Verification {
        self.run(EntityKind::Passenger, id.as_i64(), || {
            self.inner.verify_passenger(id)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    use crate::InMemoryDirectory;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
            jitter: false,
        };
        let delays: Vec<_> = policy.backoff().build().collect();
        assert_eq!(
            delays,
            [
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(250),
                Duration::from_millis(250),
            ]
        );
    }

    #[test]
    fn jittered_backoff_keeps_the_retry_budget() {
        let delays: Vec<_> = RetryPolicy::new(4, Duration::from_millis(10))
            .backoff()
            .build()
            .collect();
        assert_eq!(delays.len(), 3);
    }

    #[test]
    fn single_attempt_policy_has_no_delays() {
        assert_eq!(RetryPolicy::none().backoff().build().count(), 0);
        assert_eq!(RetryPolicy::new(0, Duration::from_millis(5)).backoff().build().count(), 0);
    }

    #[tokio::test]
    async fn transient_outage_is_retried_until_found() {
        let directory = InMemoryDirectory::new().with_drivers([1]);
        directory.fail_next(2);
        let verifier = Retrying::new(directory.clone(), fast_policy(3));

        let outcome = verifier.verify_driver(DriverId::new(1)).await;
        assert_eq!(outcome, Verification::Found);
        assert_eq!(directory.call_count(), 3);
    }

    #[tokio::test]
    async fn persistent_outage_gives_up_after_budget() {
        let directory = InMemoryDirectory::new().with_passengers([1]);
        directory.set_unavailable(true);
        let verifier = Retrying::new(directory.clone(), fast_policy(3));

        let outcome = verifier.verify_passenger(PassengerId::new(1)).await;
        assert!(outcome.is_unavailable());
        assert_eq!(directory.call_count(), 3);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let directory = InMemoryDirectory::new();
        let verifier = Retrying::new(directory.clone(), fast_policy(5));

        let outcome = verifier.verify_driver(DriverId::new(42)).await;
        assert_eq!(outcome, Verification::NotFound);
        assert_eq!(directory.call_count(), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_asks_once() {
        let directory = InMemoryDirectory::new().with_drivers([7]);
        let verifier = Retrying::new(directory.clone(), fast_policy(0));

        assert!(verifier.verify_driver(DriverId::new(7)).await.is_found());
        assert_eq!(directory.call_count(), 1);
    }
}
