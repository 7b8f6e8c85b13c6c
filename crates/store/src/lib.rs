//! Persistence for trips, ratings and the rating-event outbox.
//!
//! Two interchangeable backends implement the repository traits: an
//! in-memory store for tests and single-process runs, and PostgreSQL.
//! Both enforce the (driver, passenger) uniqueness of ratings at insert time
//! and write a trip's completion together with its outbox entry atomically.

pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod query;
pub mod repository;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use outbox::{OutboxEntry, OutboxId, lease_deadline};
pub use postgres::PostgresStore;
pub use query::{RatingFilter, TripFilter};
pub use repository::{EntryBuilder, OutboxRepository, RatingRepository, Store, TripRepository};
