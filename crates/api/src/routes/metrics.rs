//! Metric descriptions and the Prometheus scrape endpoint.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics::Unit;
use metrics_exporter_prometheus::PrometheusHandle;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Registers descriptions for every metric the services emit.
pub fn describe() {
    metrics::describe_counter!("trips_created_total", "Trips created");
    metrics::describe_counter!("trips_closed_total", "Trips completed through close-and-rate");
    metrics::describe_counter!(
        "ratings_created_total",
        "Ratings stored, from the API or from events"
    );
    metrics::describe_counter!(
        "rating_events_consumed_total",
        "Rating events handled by the consumer, by outcome"
    );
    metrics::describe_counter!("outbox_published_total", "Outbox entries published by the relay");
    metrics::describe_counter!("outbox_publish_failures_total", "Failed rating event publishes");
    metrics::describe_counter!(
        "verifier_unavailable_total",
        "Party lookups that stayed unavailable after retries"
    );
    metrics::describe_histogram!(
        "close_and_rate_duration_seconds",
        Unit::Seconds,
        "Time to complete a trip and publish its rating event"
    );
}

/// GET /metrics
pub async fn render(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    ([(CONTENT_TYPE, PROMETHEUS_TEXT)], handle.render())
}
