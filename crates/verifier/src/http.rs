//! HTTP client for the driver and passenger services.

use std::time::Duration;

use async_trait::async_trait;
use common::{DriverId, PassengerId};
use reqwest::{Client, StatusCode};

use crate::{EntityKind, EntityVerifier, Verification, VerifierError};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Where the owning services live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpVerifierConfig {
    /// Base URL of the driver resource, e.g. `http://driver-service/api/v1/drivers`.
    pub driver_base_url: String,
    /// Base URL of the passenger resource.
    pub passenger_base_url: String,
    pub timeout: Duration,
}

impl HttpVerifierConfig {
    pub fn new(driver_base_url: impl Into<String>, passenger_base_url: impl Into<String>) -> Self {
        Self {
            driver_base_url: driver_base_url.into(),
            passenger_base_url: passenger_base_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Verifies ids with `GET {base_url}/{id}`.
///
/// The response body is ignored; only the status code matters.
#[derive(Debug, Clone)]
pub struct HttpVerifier {
    client: Client,
    driver_base_url: String,
    passenger_base_url: String,
}

impl HttpVerifier {
    /// Creates a verifier whose every request is bounded by `config.timeout`.
    pub fn new(config: HttpVerifierConfig) -> Result<Self, VerifierError> {
        let driver_base_url = normalize_base_url(&config.driver_base_url)?;
        let passenger_base_url = normalize_base_url(&config.passenger_base_url)?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            driver_base_url,
            passenger_base_url,
        })
    }

    async fn lookup(&self, kind: EntityKind, base_url: &str, id: i64) -> Verification {
        let url = format!("{base_url}/{id}");

        match self.client.get(&url).send().await {
            Ok(response) => {
                let verification = classify(response.status());
                tracing::debug!(entity = %kind, id, status = %response.status(), ?verification, "Remote lookup answered");
                verification
            }
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("{kind} service timed out")
                } else {
                    format!("{kind} service unreachable: {e}")
                };
                tracing::warn!(entity = %kind, id, error = %e, "Remote lookup failed");
                Verification::Unavailable(reason)
            }
        }
    }
}

#[async_trait]
impl EntityVerifier for HttpVerifier {
    async fn verify_driver(&self, id: DriverId) -> Verification {
        self.lookup(EntityKind::Driver, &self.driver_base_url, id.as_i64())
            .await
    }

    async fn verify_passenger(&self, id: PassengerId) -> Verification {
        self.lookup(EntityKind::Passenger, &self.passenger_base_url, id.as_i64())
            .await
    }
}

/// Maps a response status to a verification outcome.
///
/// 408 and 429 say nothing about the entity, so they count as unavailable
/// like server errors do. Every other client error means the id is unknown.
pub fn classify(status: StatusCode) -> Verification {
    if status.is_success() {
        Verification::Found
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        Verification::Unavailable(format!("HTTP {status}"))
    } else if status.is_client_error() {
        Verification::NotFound
    } else {
        Verification::Unavailable(format!("HTTP {status}"))
    }
}

fn normalize_base_url(url: &str) -> Result<String, VerifierError> {
    let trimmed = url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(VerifierError::InvalidBaseUrl(url.to_string()));
    }
    Ok(trimmed.to_string())
}
