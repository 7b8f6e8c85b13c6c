//! In-memory directory of known drivers and passengers.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use common::{DriverId, PassengerId};

use crate::{EntityVerifier, Verification};

#[derive(Debug, Default)]
struct Flags {
    unavailable: AtomicBool,
    fail_next: AtomicU32,
    calls: AtomicUsize,
}

/// Verifier backed by fixed id sets, for testing and single-process runs.
///
/// Supports simulated outages: either permanent until reset, or for the
/// next N lookups.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    drivers: Arc<HashSet<DriverId>>,
    passengers: Arc<HashSet<PassengerId>>,
    flags: Arc<Flags>,
}

impl InMemoryDirectory {
    /// Creates an empty directory; every lookup answers `NotFound`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds known drivers.
    pub fn with_drivers(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        let mut drivers = (*self.drivers).clone();
        drivers.extend(ids.into_iter().map(DriverId::new));
        self.drivers = Arc::new(drivers);
        self
    }

    /// Adds known passengers.
    pub fn with_passengers(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        let mut passengers = (*self.passengers).clone();
        passengers.extend(ids.into_iter().map(PassengerId::new));
        self.passengers = Arc::new(passengers);
        self
    }

    /// Makes every lookup report `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.flags.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` lookups report `Unavailable`.
    pub fn fail_next(&self, count: u32) {
        self.flags.fail_next.store(count, Ordering::SeqCst);
    }

    /// Returns the number of lookups answered so far.
    pub fn call_count(&self) -> usize {
        self.flags.calls.load(Ordering::SeqCst)
    }

    fn answer(&self, known: bool) -> Verification {
        self.flags.calls.fetch_add(1, Ordering::SeqCst);

        if self.flags.unavailable.load(Ordering::SeqCst) {
            return Verification::Unavailable("simulated outage".to_string());
        }
        let consumed = self
            .flags
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Verification::Unavailable("simulated transient failure".to_string());
        }

        if known {
            Verification::Found
        } else {
            Verification::NotFound
        }
    }
}

#[async_trait]
impl EntityVerifier for InMemoryDirectory {
    async fn verify_driver(&self, id: DriverId) -> Verification {
        self.answer(self.drivers.contains(&id))
    }

    async fn verify_passenger(&self, id: PassengerId) -> Verification {
        self.answer(self.passengers.contains(&id))
    }
}
