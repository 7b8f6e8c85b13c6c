//! Shared types for the trip and rating services.
//!
//! Everything that crosses a crate boundary lives here: numeric identifiers,
//! the persisted trip and rating records, the rating-creation wire record and
//! the paging envelope used by list endpoints.

pub mod event;
pub mod page;
pub mod rating;
pub mod trip;
pub mod types;

pub use event::RatingCreationEvent;
pub use page::{Page, PageRequest, PageRequestError, RatingSortKey, SortDirection, TripSortKey};
pub use rating::{NewRating, Rating};
pub use trip::{NewTrip, ParseTripStatusError, Trip, TripStatus, TripUpdate};
pub use types::{DriverId, PassengerId, RatingId, TripId};
