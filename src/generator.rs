//! Generative candidate source.
//!
//! [`ChatCandidateSource`] asks an OpenAI-compatible chat completions
//! endpoint for recommendations matching a category and parses the
//! strict-JSON reply into [`Candidate`]s. Titles are not trusted; they are
//! resolved and filtered downstream.
//!
//! Each request carries a [`TasteProfile`] built from recent watch history,
//! which may be empty.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use curator_core::models::Candidate;

use crate::config::{CategoryConfig, GeneratorConfig};
use crate::error::ProviderError;
use crate::http::{build_client, send_with_retry};

/// What the household has been watching, shared by every category in a
/// batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TasteProfile {
    pub recent_watches: Vec<String>,
}

#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Up to `count` candidates for `category`, in preference order.
    async fn generate(
        &self,
        category: &CategoryConfig,
        count: usize,
        taste: &TasteProfile,
    ) -> Result<Vec<Candidate>>;
}

const SYSTEM_PROMPT: &str = "You are a recommender for a private media server. \
Suggest items constrained by the provided category. Return strict JSON matching \
the output schema. Give the original release year. No streaming or acquisition info.";

pub struct ChatCandidateSource {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl ChatCandidateSource {
    /// Build from config, reading the key from `LLM_API_KEY`.
    pub fn new(config: &GeneratorConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var("LLM_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ProviderError::MissingCredentials("LLM_API_KEY"))?;
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

/// The user message: the category, the taste profile and the reply schema
/// as one JSON document.
pub fn build_prompt(
    category: &CategoryConfig,
    count: usize,
    taste: &TasteProfile,
) -> serde_json::Value {
    json!({
        "task": "recommend",
        "count": count,
        "category": category,
        "taste_profile": taste,
        "output_schema": {
            "type": "object",
            "properties": {
                "recommendations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": {"type": "string"},
                            "year": {"type": "integer"},
                            "medium": {"type": "string", "enum": ["movie", "tv"]},
                            "why": {"type": "string"},
                            "keywords": {"type": "array", "items": {"type": "string"}}
                        }
                    }
                }
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct Recommendations {
    #[serde(default)]
    recommendations: Vec<Candidate>,
}

/// Parse the assistant's reply. Tolerates a surrounding Markdown fence.
pub fn parse_candidates(content: &str) -> Result<Vec<Candidate>> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);

    let parsed: Recommendations =
        serde_json::from_str(body.trim()).context("Failed to parse generator response")?;
    Ok(parsed
        .recommendations
        .into_iter()
        .filter(|c| !c.title.trim().is_empty())
        .collect())
}

fn message_content(json: &serde_json::Value) -> Result<&str> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message.content"))
}

#[async_trait]
impl CandidateSource for ChatCandidateSource {
    async fn generate(
        &self,
        category: &CategoryConfig,
        count: usize,
        taste: &TasteProfile,
    ) -> Result<Vec<Candidate>> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_prompt(category, count, taste).to_string()}
            ]
        });

        let url = format!("{}/chat/completions", self.api_base);
        let response = send_with_retry(
            || {
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            },
            self.max_retries,
        )
        .await
        .with_context(|| format!("Generator request failed for '{}'", category.label))?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(ProviderError::from)
            .context("Failed to read generator response")?;

        let mut candidates = parse_candidates(message_content(&json)?)?;
        candidates.truncate(count);

        info!(category = %category.label, count = candidates.len(), "candidates generated");
        Ok(candidates)
    }
}
