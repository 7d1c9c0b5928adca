//! Watch history for the generator's taste profile.
//!
//! [`TautulliHistory`] reads recent plays from Tautulli's `get_history`
//! command. Episodes are folded into their show, music is ignored, and the
//! list is deduplicated in most-recent-first order before it is capped.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tracing::info;

use crate::config::WatchHistoryConfig;
use crate::error::ProviderError;
use crate::http::{build_client, send_with_retry};

/// A recently watched movie or show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedTitle {
    pub title: String,
    pub year: Option<i32>,
}

impl WatchedTitle {
    /// `"Title (Year)"`, or just the title when the year is unknown.
    pub fn label(&self) -> String {
        match self.year {
            Some(year) => format!("{} ({})", self.title, year),
            None => self.title.clone(),
        }
    }
}

#[async_trait]
pub trait WatchHistoryProvider: Send + Sync {
    /// Titles watched recently, most recent first.
    async fn recent(&self) -> Result<Vec<WatchedTitle>>;
}

/// Distinct labels of `watched`, in order, at most `limit` of them.
pub fn taste_profile(watched: &[WatchedTitle], limit: usize) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for title in watched {
        let label = title.label();
        if !labels.contains(&label) {
            labels.push(label);
        }
        if labels.len() >= limit {
            break;
        }
    }
    labels
}

// ============ Tautulli ============

#[derive(Debug, Deserialize)]
struct Envelope {
    response: HistoryResponse,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    result: String,
    #[serde(default)]
    message: Option<String>,
    data: Option<HistoryPage>,
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    data: Vec<HistoryRow>,
}

#[derive(Debug, Deserialize)]
struct HistoryRow {
    #[serde(default)]
    title: String,
    #[serde(default)]
    grandparent_title: String,
    #[serde(default)]
    media_type: String,
    #[serde(default, deserialize_with = "lenient_year")]
    year: Option<i32>,
}

/// Tautulli reports the year as a number, a numeric string, or `""`.
fn lenient_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::Number(n)) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|y| *y > 0))
}

/// Parse a `get_history` reply into watched titles.
pub fn parse_history(body: &str) -> Result<Vec<WatchedTitle>> {
    let envelope: Envelope =
        serde_json::from_str(body).context("Failed to parse watch history response")?;
    let response = envelope.response;
    if response.result != "success" {
        bail!(
            "watch history request was not successful: {}",
            response.message.unwrap_or(response.result)
        );
    }

    Ok(response
        .data
        .map(|page| page.data)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|row| {
            let title = match row.media_type.as_str() {
                "movie" => row.title,
                "episode" => row.grandparent_title,
                _ => return None,
            };
            let title = title.trim().to_string();
            if title.is_empty() {
                return None;
            }
            Some(WatchedTitle {
                title,
                year: row.year,
            })
        })
        .collect())
}

/// Tautulli watch history. The key is read from `TAUTULLI_API_KEY`.
pub struct TautulliHistory {
    client: Client,
    base_url: String,
    api_key: String,
    lookback_days: u32,
}

impl TautulliHistory {
    pub fn new(config: &WatchHistoryConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var("TAUTULLI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ProviderError::MissingCredentials("TAUTULLI_API_KEY"))?;
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key,
            lookback_days: config.lookback_days,
        })
    }

    fn after(&self, now: DateTime<Utc>) -> String {
        let since = now
            .checked_sub_signed(chrono::Duration::days(i64::from(self.lookback_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        since.format("%Y-%m-%d").to_string()
    }
}

#[async_trait]
impl WatchHistoryProvider for TautulliHistory {
    async fn recent(&self) -> Result<Vec<WatchedTitle>> {
        let url = format!("{}/api/v2", self.base_url);
        let after = self.after(Utc::now());
        let response = send_with_retry(
            || {
                self.client.get(&url).query(&[
                    ("apikey", self.api_key.as_str()),
                    ("cmd", "get_history"),
                    ("length", "1000"),
                    ("order_column", "date"),
                    ("order_dir", "desc"),
                    ("after", after.as_str()),
                ])
            },
            1,
        )
        .await
        .context("Watch history request failed")?;

        let body = response
            .text()
            .await
            .map_err(ProviderError::Network)
            .context("Failed to read watch history response")?;
        let watched = parse_history(&body)?;

        info!(
            lookback_days = self.lookback_days,
            count = watched.len(),
            "watch history fetched"
        );
        Ok(watched)
    }
}
