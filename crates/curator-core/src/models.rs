//! Core data models used throughout Curator.
//!
//! These types represent the candidates produced by a generative source,
//! the catalog metadata they resolve to, and the records the store keeps
//! so later batches stay disjoint from earlier ones.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two media kinds the catalog distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    Movie,
    Tv,
}

/// Returned when free text cannot be mapped onto a [`Medium`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown medium: '{0}' (expected movie or tv)")]
pub struct UnknownMedium(pub String);

impl Medium {
    /// Normalize a free-text medium ("Show", "series", "film", ...) to the
    /// canonical two-value enum.
    pub fn normalize(raw: &str) -> Result<Medium, UnknownMedium> {
        let folded = raw.trim().to_lowercase();
        match folded.as_str() {
            "movie" | "movies" | "film" => Ok(Medium::Movie),
            "tv" | "show" | "shows" | "series" | "tv show" | "tv series" | "tv_show"
            | "tv-show" | "miniseries" => Ok(Medium::Tv),
            _ => Err(UnknownMedium(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Medium::Movie => "movie",
            Medium::Tv => "tv",
        }
    }
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A catalog id qualified by medium. Catalog ids are namespaced per
/// medium, so this pair is the dedup key across history and inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalKey {
    pub canonical_id: i64,
    pub medium: Medium,
}

impl CanonicalKey {
    pub fn new(canonical_id: i64, medium: Medium) -> Self {
        Self {
            canonical_id,
            medium,
        }
    }
}

/// An unresolved item as produced by the generative source.
///
/// `medium` is kept as free text; it is normalized during resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub year: i32,
    pub medium: String,
    #[serde(default, alias = "why")]
    pub rationale: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Candidate {
    pub fn new(title: &str, year: i32, medium: &str) -> Self {
        Self {
            title: title.to_string(),
            year,
            medium: medium.to_string(),
            rationale: String::new(),
            keywords: Vec::new(),
        }
    }
}

/// Cache key for a resolution: the exact `(title, year, medium)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolutionKey {
    pub title: String,
    pub year: i32,
    pub medium: Medium,
}

impl ResolutionKey {
    pub fn new(title: &str, year: i32, medium: Medium) -> Self {
        Self {
            title: title.to_string(),
            year,
            medium,
        }
    }
}

/// The enriched catalog record a candidate resolves to.
///
/// Cache hits and fresh resolutions both yield the full record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMetadata {
    pub canonical_id: i64,
    pub medium: Medium,
    pub title: String,
    pub external_id: Option<String>,
    pub country: Option<String>,
    pub runtime_minutes: Option<u32>,
    pub vote_count: u32,
    pub vote_average: f64,
    pub genres: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
}

impl ResolvedMetadata {
    pub fn key(&self) -> CanonicalKey {
        CanonicalKey::new(self.canonical_id, self.medium)
    }
}

/// A row of the resolution cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResolution {
    pub key: ResolutionKey,
    pub metadata: ResolvedMetadata,
    pub resolved_at: DateTime<Utc>,
}

/// One published recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedItem {
    pub title: String,
    pub year: i32,
    pub medium: Medium,
    pub canonical_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_minutes: Option<u32>,
    pub vote_count: u32,
    pub vote_average: f64,
    pub genres: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    pub rationale: String,
}

impl ResolvedItem {
    /// Combine a candidate with its resolved metadata. Candidate keywords
    /// are merged into the catalog keywords.
    ///
    /// `title` is the catalog's spelling. `year` is the candidate's: it is
    /// the year the catalog search was filtered on and part of the cache
    /// key.
    pub fn from_resolution(candidate: &Candidate, metadata: ResolvedMetadata) -> Self {
        let mut keywords = metadata.keywords;
        keywords.extend(
            candidate
                .keywords
                .iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
        );
        Self {
            title: metadata.title,
            year: candidate.year,
            medium: metadata.medium,
            canonical_id: metadata.canonical_id,
            external_id: metadata.external_id,
            runtime_minutes: metadata.runtime_minutes,
            vote_count: metadata.vote_count,
            vote_average: metadata.vote_average,
            genres: metadata.genres,
            keywords,
            rationale: candidate.rationale.clone(),
        }
    }

    pub fn key(&self) -> CanonicalKey {
        CanonicalKey::new(self.canonical_id, self.medium)
    }
}

/// The result set for one category run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedOutput {
    #[serde(rename = "category")]
    pub category_label: String,
    pub resolved_at: DateTime<Utc>,
    pub items: Vec<ResolvedItem>,
}

/// A row of recommendation history, unique per `(label, canonical_id, medium)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub label: String,
    pub canonical_id: i64,
    pub medium: Medium,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// An item currently held by the target library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InventoryItem {
    pub canonical_id: i64,
    pub medium: Medium,
}

impl InventoryItem {
    pub fn key(&self) -> CanonicalKey {
        CanonicalKey::new(self.canonical_id, self.medium)
    }
}

/// Lifecycle state of a batch or a category run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<RunStatus> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// One batch across all configured categories.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRun {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub mode: String,
    pub status: RunStatus,
    pub error: Option<String>,
}

/// One category processed within a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryRun {
    pub id: i64,
    pub job_id: i64,
    pub label: String,
    pub kind: String,
    pub status: RunStatus,
    pub item_count: i64,
    pub error: Option<String>,
}

/// Row counts for `curator status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub cached_resolutions: i64,
    pub history_entries: i64,
    pub inventory_items: i64,
    pub job_runs: i64,
}
