//! Domain layer for trips and ratings.
//!
//! This crate provides:
//! - Request types with field-level validation
//! - `TripService` for trip CRUD and status changes
//! - `RatingService` for the synchronous rating API and for recording
//!   ratings that arrive as events
//! - `DomainError`, classified by [`ErrorKind`] for transport mapping
//!
//! Services are generic over a repository and an [`verifier::EntityVerifier`];
//! every write that names a driver or passenger verifies both first.

pub mod error;
pub mod rating;
pub mod references;
pub mod trip;
pub mod validation;

pub use error::{DomainError, ErrorKind, Result};
pub use rating::{RatingRequest, RatingService, RecordOutcome, ScoreRequest};
pub use references::verify_parties;
pub use trip::{StatusPolicy, TripRequest, TripService, parse_status};
pub use validation::ValidationErrors;
