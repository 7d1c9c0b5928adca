//! Errors raised by the external providers (catalog, library, generator).
//!
//! Component-level errors live beside their component:
//! [`ResolveError`](crate::resolver::ResolveError),
//! [`PipelineError`](crate::pipeline::PipelineError) and
//! [`BatchError`](crate::batch::BatchError).

use std::time::Duration;

/// A failed call to an external provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("{0} not set")]
    MissingCredentials(&'static str),
}

impl ProviderError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Network(_) | ProviderError::Timeout(_) => true,
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Parse(_) | ProviderError::MissingCredentials(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Network(err)
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Parse(err.to_string())
    }
}
