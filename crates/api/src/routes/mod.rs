//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod ratings;
pub mod trips;

use axum::extract::Path;
use axum::extract::rejection::PathRejection;

use crate::error::ApiError;

/// Unwraps a numeric path id, turning a malformed one into a 400.
pub(crate) fn path_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    let Path(id) = path?;
    Ok(id)
}
