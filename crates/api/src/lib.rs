//! HTTP API for trips and ratings.
//!
//! Provides REST endpoints for trip management, close-and-rate and ratings,
//! with structured logging (tracing) and Prometheus metrics. Which endpoint
//! groups are mounted depends on the [`config::ServiceRole`].

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, patch, post};
use domain::{RatingService, StatusPolicy, TripService};
use messaging::EventChannel;
use metrics_exporter_prometheus::PrometheusHandle;
use pipeline::ClosureOrchestrator;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use verifier::EntityVerifier;

use config::ServiceRole;

pub use routes::metrics::describe as describe_metrics;

/// Verifier shared by every handler.
pub type SharedVerifier = Arc<dyn EntityVerifier>;

/// Event channel shared by the closure path, the relay and the consumer.
pub type SharedChannel = Arc<dyn EventChannel>;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub trips: TripService<S, SharedVerifier>,
    pub ratings: RatingService<S, SharedVerifier>,
    pub closure: ClosureOrchestrator<S, SharedChannel>,
}

impl<S: Store> AppState<S> {
    pub fn new(
        store: S,
        verifier: SharedVerifier,
        channel: SharedChannel,
        policy: StatusPolicy,
        rating_topic: &str,
    ) -> Self {
        Self {
            trips: TripService::new(store.clone(), verifier.clone()).with_policy(policy),
            ratings: RatingService::new(store.clone(), verifier),
            closure: ClosureOrchestrator::new(store, channel).with_topic(rating_topic),
        }
    }

    /// Sets how long a closing request holds its outbox entry.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.closure = self.closure.with_claim_lease(lease);
        self
    }
}

/// Creates the Axum application router for the given role.
pub fn create_app<S: Store>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
    role: ServiceRole,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    let mut api = Router::new();
    if role.serves_trips() {
        api = api
            .route(
                "/api/v1/trips",
                post(routes::trips::create::<S>).get(routes::trips::list::<S>),
            )
            .route(
                "/api/v1/trips/{id}",
                get(routes::trips::get::<S>)
                    .put(routes::trips::update::<S>)
                    .delete(routes::trips::delete::<S>),
            )
            .route(
                "/api/v1/trips/{id}/status",
                patch(routes::trips::update_status::<S>),
            )
            .route("/api/v1/trips/{id}/close", post(routes::trips::close::<S>));
    }
    if role.serves_ratings() {
        api = api
            .route(
                "/api/v1/rating",
                post(routes::ratings::create::<S>).get(routes::ratings::list::<S>),
            )
            .route(
                "/api/v1/rating/{id}",
                get(routes::ratings::get::<S>)
                    .put(routes::ratings::update::<S>)
                    .delete(routes::ratings::delete::<S>),
            )
            .route(
                "/api/v1/rating/{id}/average",
                get(routes::ratings::average::<S>),
            );
    }

    Router::new()
        .route("/health", get(move || routes::health::check(role)))
        .merge(api.with_state(state))
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
