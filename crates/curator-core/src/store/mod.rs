//! Storage abstraction for Curator.
//!
//! The [`Store`] trait owns every persisted entity: the resolution cache,
//! recommendation history, the library inventory snapshot, and batch run
//! records. The resolver, exclusion filter, and pipeline only go through
//! these operations, which lets them run against SQLite in production and
//! [`memory::InMemoryStore`] in tests.
//!
//! Implementations must be `Send + Sync` and tolerate concurrent readers
//! while a batch is writing. Timestamps are always supplied by the caller.

pub mod memory;

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    CachedResolution, CanonicalKey, CategoryRun, HistoryEntry, InventoryItem, JobRun, Medium,
    ResolutionKey, ResolvedOutput, RunStatus, StoreStats,
};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`cached_resolution`](Store::cached_resolution) | Freshest cache row for a `(title, year, medium)` |
/// | [`upsert_resolution`](Store::upsert_resolution) | Insert or overwrite a cache row |
/// | [`record_recommendation`](Store::record_recommendation) | Insert history or bump `last_seen_at` |
/// | [`recommended_since`](Store::recommended_since) | History keys for a label seen since a cutoff |
/// | [`replace_inventory`](Store::replace_inventory) | Atomically swap the inventory snapshot |
/// | [`inventory_keys`](Store::inventory_keys) | Current inventory snapshot |
/// | [`library_key_ids`](Store::library_key_ids) | Per-item library cache (rating key → id) |
#[async_trait]
pub trait Store: Send + Sync {
    /// Most recent resolution for the exact key, if any.
    async fn cached_resolution(&self, key: &ResolutionKey) -> Result<Option<CachedResolution>>;

    /// Write a resolution, overwriting any previous row for the same key.
    async fn upsert_resolution(&self, entry: &CachedResolution) -> Result<()>;

    /// Record that `key` was recommended under `label` at `at`.
    ///
    /// Inserts a new row with `first_seen_at = last_seen_at = at`, or bumps
    /// `last_seen_at` on the existing row.
    async fn record_recommendation(
        &self,
        label: &str,
        key: CanonicalKey,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Keys recommended under `label` whose `last_seen_at >= since`.
    async fn recommended_since(
        &self,
        label: &str,
        since: DateTime<Utc>,
    ) -> Result<HashSet<CanonicalKey>>;

    /// The history row for one key, if any.
    async fn history_entry(&self, label: &str, key: CanonicalKey)
        -> Result<Option<HistoryEntry>>;

    /// All history rows for `label`, most recently seen first.
    async fn history_for_label(&self, label: &str) -> Result<Vec<HistoryEntry>>;

    /// Replace the whole inventory snapshot. All-or-nothing.
    async fn replace_inventory(&self, items: &[InventoryItem], at: DateTime<Utc>) -> Result<()>;

    /// The current inventory snapshot.
    async fn inventory_keys(&self) -> Result<HashSet<CanonicalKey>>;

    /// Rating key → canonical id mappings learned on earlier inventory scans.
    async fn library_key_ids(&self) -> Result<HashMap<String, i64>>;

    /// Remember the canonical id for a library rating key.
    async fn remember_library_key(
        &self,
        rating_key: &str,
        canonical_id: i64,
        medium: Medium,
    ) -> Result<()>;

    /// Create a `running` batch record and return its id.
    async fn start_job(&self, mode: &str, at: DateTime<Utc>) -> Result<i64>;

    async fn finish_job(
        &self,
        job_id: i64,
        status: RunStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Create a `running` category record under a batch.
    async fn start_category_run(&self, job_id: i64, label: &str, kind: &str) -> Result<i64>;

    /// Close a category run. `output` is stored for the status surface.
    async fn finish_category_run(
        &self,
        run_id: i64,
        status: RunStatus,
        output: Option<&ResolvedOutput>,
        error: Option<&str>,
    ) -> Result<()>;

    async fn latest_job(&self) -> Result<Option<JobRun>>;

    async fn category_runs(&self, job_id: i64) -> Result<Vec<CategoryRun>>;

    /// The output of the most recent completed run for `label`.
    async fn latest_category_output(&self, label: &str) -> Result<Option<ResolvedOutput>>;

    async fn stats(&self) -> Result<StoreStats>;
}
