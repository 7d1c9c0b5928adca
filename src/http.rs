//! Shared HTTP plumbing for provider clients: client construction and a
//! request loop with exponential backoff.
//!
//! HTTP 429 and 5xx responses and network errors are retried; other 4xx
//! responses fail immediately.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use tracing::debug;

use crate::error::ProviderError;

pub fn build_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("curator/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(ProviderError::Network)
}

/// Send the request produced by `make`, retrying transient failures up to
/// `max_retries` times. Backoff doubles from 500 ms.
pub async fn send_with_retry<F>(make: F, max_retries: u32) -> Result<Response, ProviderError>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        match send_once(make()).await {
            Ok(response) => return Ok(response),
            Err(err) if err.is_transient() && attempt < max_retries => {
                let delay = Duration::from_millis(500 << attempt.min(5));
                debug!(attempt, ?delay, error = %err, "retrying provider request");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn send_once(request: RequestBuilder) -> Result<Response, ProviderError> {
    let response = request.send().await.map_err(ProviderError::Network)?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        status: status.as_u16(),
        message: truncate(&message, 300),
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
