//! API server entry point.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use api::config::{Config, LogFormat};
use api::{AppState, SharedChannel, SharedVerifier};
use domain::RatingService;
use messaging::{InMemoryEventChannel, TopicConfig};
use pipeline::{ConsumerConfig, OutboxRelay, RatingEventConsumer, RelayConfig};
use sqlx::postgres::PgPoolOptions;
use store::{InMemoryStore, PostgresStore, Store};
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use verifier::{HttpVerifier, HttpVerifierConfig, InMemoryDirectory, RetryPolicy, Retrying};

/// How long background tasks get to finish after the server stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn build_verifier(config: &Config) -> SharedVerifier {
    match (&config.driver_service_url, &config.passenger_service_url) {
        (Some(drivers), Some(passengers)) => {
            let http = HttpVerifier::new(
                HttpVerifierConfig::new(drivers.as_str(), passengers.as_str())
                    .with_timeout(config.verifier_timeout),
            )
            .expect("invalid driver/passenger service URL");
            tracing::info!(%drivers, %passengers, "verifying parties over HTTP");
            Arc::new(Retrying::new(
                http,
                RetryPolicy::new(config.verifier_max_attempts, config.verifier_backoff),
            ))
        }
        _ => {
            tracing::warn!(
                drivers = config.local_driver_ids.len(),
                passengers = config.local_passenger_ids.len(),
                "no lookup URLs configured, using in-memory directory"
            );
            Arc::new(
                InMemoryDirectory::new()
                    .with_drivers(config.local_driver_ids.iter().copied())
                    .with_passengers(config.local_passenger_ids.iter().copied()),
            )
        }
    }
}

#[cfg(feature = "kafka")]
async fn build_channel(config: &Config, topic: &TopicConfig) -> SharedChannel {
    use messaging::{KafkaConfig, KafkaEventChannel};

    match &config.kafka_brokers {
        Some(brokers) => {
            let channel = KafkaEventChannel::new(KafkaConfig::new(brokers.as_str()))
                .expect("failed to create Kafka channel");
            channel
                .ensure_topic(topic)
                .await
                .expect("failed to provision rating topic");
            Arc::new(channel)
        }
        None => in_memory_channel(topic).await,
    }
}

#[cfg(not(feature = "kafka"))]
async fn build_channel(config: &Config, topic: &TopicConfig) -> SharedChannel {
    assert!(
        config.kafka_brokers.is_none(),
        "KAFKA_BROKERS is set but this binary was built without the `kafka` feature"
    );
    in_memory_channel(topic).await
}

async fn in_memory_channel(topic: &TopicConfig) -> SharedChannel {
    tracing::warn!("no KAFKA_BROKERS configured, using in-process channel");
    let channel = InMemoryEventChannel::new();
    channel.create_topic(topic).await;
    Arc::new(channel)
}

/// Spawns the relay and consumer for the role, builds the router and serves.
///
/// Returns false if a background task failed.
async fn run<S: Store>(
    store: S,
    config: Config,
    metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
) -> bool {
    let verifier = build_verifier(&config);
    let topic = TopicConfig::with_defaults(config.rating_topic.as_str());
    let channel = build_channel(&config, &topic).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let relay: Option<JoinHandle<()>> = config.role.serves_trips().then(|| {
        let relay = OutboxRelay::new(
            store.clone(),
            channel.clone(),
            RelayConfig {
                poll_interval: config.outbox_poll_interval,
                batch_size: config.outbox_batch_size,
                claim_lease: config.outbox_claim_lease,
            },
        );
        tokio::spawn(relay.run(shutdown_rx.clone()))
    });

    let consumer: Option<JoinHandle<bool>> = config.role.serves_ratings().then(|| {
        let consumer = RatingEventConsumer::new(
            RatingService::new(store.clone(), verifier.clone()),
            channel.clone(),
            ConsumerConfig {
                topic: config.rating_topic.clone(),
                group: config.rating_group.clone(),
                ..ConsumerConfig::default()
            },
        );
        let rx = shutdown_rx.clone();
        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            match consumer.run(rx).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, "rating consumer failed, shutting down");
                    tx.send_replace(true);
                    false
                }
            }
        })
    });

    let state = Arc::new(
        AppState::new(
            store,
            verifier,
            channel,
            config.status_policy,
            &config.rating_topic,
        )
        .with_claim_lease(config.outbox_claim_lease),
    );
    let app = api::create_app(state, metrics_handle, config.role);

    let addr = config.addr();
    tracing::info!(%addr, role = config.role.as_str(), "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    let mut stop_rx = shutdown_rx.clone();
    let stop = async move {
        tokio::select! {
            () = shutdown_signal() => {}
            _ = stop_rx.changed() => {}
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(stop)
        .await
        .expect("server error");

    shutdown_tx.send_replace(true);
    let mut healthy = true;
    if let Some(handle) = relay
        && tokio::time::timeout(DRAIN_TIMEOUT, handle).await.is_err()
    {
        tracing::warn!("outbox relay did not stop in time");
    }
    if let Some(handle) = consumer {
        match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
            Ok(Ok(ok)) => healthy &= ok,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "rating consumer task panicked");
                healthy = false;
            }
            Err(_) => tracing::warn!("rating consumer did not stop in time"),
        }
    }
    healthy
}

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env().expect("invalid configuration");
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    api::describe_metrics();

    // 3. Pick the store and run
    let healthy = match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let store = PostgresStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL store");
            run(store, config, metrics_handle).await
        }
        None => {
            tracing::warn!("no DATABASE_URL configured, using in-memory store");
            run(InMemoryStore::new(), config, metrics_handle).await
        }
    };

    tracing::info!("server shut down gracefully");
    if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
