//! Liveness probe.

use axum::Json;
use serde::Serialize;

use crate::config::ServiceRole;

#[derive(Debug, Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub role: &'static str,
    pub version: &'static str,
}

/// GET /health: dependencies are not probed.
pub async fn check(role: ServiceRole) -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        role: role.as_str(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
