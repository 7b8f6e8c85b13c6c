use thiserror::Error;

/// Errors raised while building a verifier.
///
/// Lookups themselves never fail; they report problems as
/// [`Verification::Unavailable`](crate::Verification::Unavailable).
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("Invalid base URL '{0}'")]
    InvalidBaseUrl(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}
