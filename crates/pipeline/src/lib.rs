//! The trip-closure-to-rating pipeline.
//!
//! Closing a trip writes its `Completed` status and a rating event to the
//! outbox in one transaction, then publishes the event. The relay publishes
//! whatever the closure path could not, and the consumer turns events into
//! ratings, keeping at most one per (driver, passenger) pair.
//!
//! ```text
//! close_and_rate ──► trips + rating_outbox ──► rating-topic ──► consumer ──► ratings
//!                          │                        ▲
//!                          └──── OutboxRelay ───────┘
//! ```

pub mod closure;
pub mod consumer;
pub mod error;
pub mod relay;

pub use closure::{Closure, ClosureOrchestrator, DEFAULT_CLAIM_LEASE};
pub use consumer::{ConsumeOutcome, ConsumerConfig, RatingEventConsumer};
pub use error::{ClosureError, ConsumerError};
pub use relay::{OutboxRelay, RelayConfig, RelayReport};

/// Topic carrying rating-creation events.
pub const RATING_TOPIC: &str = "rating-topic";

/// Consumer group of the rating side.
pub const RATING_GROUP: &str = "rating-group";
