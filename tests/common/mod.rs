//! Offline fakes for the provider traits.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use curator::catalog::{CatalogProvider, SearchHit, TitleDetails};
use curator::config::CategoryConfig;
use curator::error::ProviderError;
use curator::generator::{CandidateSource, TasteProfile};
use curator::inventory::InventoryProvider;
use curator::models::{
    CachedResolution, Candidate, CanonicalKey, CategoryRun, HistoryEntry, InventoryItem, JobRun,
    Medium, ResolutionKey, ResolvedOutput, RunStatus, StoreStats,
};
use curator::store::memory::InMemoryStore;
use curator::store::Store;
use curator::watch_history::{WatchHistoryProvider, WatchedTitle};

#[derive(Clone)]
pub struct Title {
    pub id: i64,
    pub name: String,
    pub details: Option<TitleDetails>,
    pub keywords: Option<Vec<String>>,
}

/// Catalog keyed by lowercase title and medium. Titles not registered
/// return zero hits; titles marked broken return a 503.
#[derive(Default)]
pub struct FakeCatalog {
    titles: HashMap<(String, Medium), Title>,
    broken: Vec<String>,
    searches: AtomicUsize,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fully enriched title.
    pub fn with(mut self, title: &str, medium: Medium, id: i64) -> Self {
        self.titles.insert(
            (title.to_lowercase(), medium),
            Title {
                id,
                name: title.to_string(),
                details: Some(TitleDetails {
                    genres: vec!["Drama".into()],
                    runtime_minutes: Some(60),
                    country: Some("US".into()),
                    imdb_id: Some(format!("tt{:07}", id)),
                }),
                keywords: Some(vec!["catalog".into()]),
            },
        );
        self
    }

    /// Register a title whose details and keywords calls fail.
    pub fn with_bare(mut self, title: &str, medium: Medium, id: i64) -> Self {
        self.titles.insert(
            (title.to_lowercase(), medium),
            Title {
                id,
                name: title.to_string(),
                details: None,
                keywords: None,
            },
        );
        self
    }

    pub fn broken(mut self, title: &str) -> Self {
        self.broken.push(title.to_lowercase());
        self
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    fn by_id(&self, id: i64, medium: Medium) -> Option<&Title> {
        self.titles
            .iter()
            .find(|((_, m), t)| *m == medium && t.id == id)
            .map(|(_, t)| t)
    }
}

fn unavailable() -> ProviderError {
    ProviderError::Api {
        status: 503,
        message: "unavailable".into(),
    }
}

#[async_trait]
impl CatalogProvider for FakeCatalog {
    async fn search(
        &self,
        title: &str,
        _year: i32,
        medium: Medium,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let folded = title.to_lowercase();
        if self.broken.contains(&folded) {
            return Err(unavailable());
        }
        Ok(self
            .titles
            .get(&(folded, medium))
            .map(|t| SearchHit {
                catalog_id: t.id,
                title: t.name.clone(),
                vote_count: 100,
                vote_average: 7.5,
                overview: String::new(),
            })
            .into_iter()
            .collect())
    }

    async fn details(&self, catalog_id: i64, medium: Medium) -> Result<TitleDetails, ProviderError> {
        self.by_id(catalog_id, medium)
            .and_then(|t| t.details.clone())
            .ok_or_else(unavailable)
    }

    async fn keywords(&self, catalog_id: i64, medium: Medium) -> Result<Vec<String>, ProviderError> {
        self.by_id(catalog_id, medium)
            .and_then(|t| t.keywords.clone())
            .ok_or_else(unavailable)
    }
}

/// Candidates per category label. Labels not registered fail.
#[derive(Default)]
pub struct FakeSource {
    lists: HashMap<String, Vec<Candidate>>,
    calls: Mutex<Vec<(String, usize)>>,
    tastes: Mutex<Vec<TasteProfile>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: &str, candidates: Vec<Candidate>) -> Self {
        self.lists.insert(label.to_string(), candidates);
        self
    }

    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }

    /// The taste profile passed with each call, in call order.
    pub fn tastes(&self) -> Vec<TasteProfile> {
        self.tastes.lock().unwrap().clone()
    }
}

#[async_trait]
impl CandidateSource for FakeSource {
    async fn generate(
        &self,
        category: &CategoryConfig,
        count: usize,
        taste: &TasteProfile,
    ) -> Result<Vec<Candidate>> {
        self.calls
            .lock()
            .unwrap()
            .push((category.label.clone(), count));
        self.tastes.lock().unwrap().push(taste.clone());
        self.lists
            .get(&category.label)
            .cloned()
            .ok_or_else(|| anyhow!("generator unavailable for '{}'", category.label))
    }
}

pub struct FakeInventory {
    pub items: Vec<InventoryItem>,
    pub fail: bool,
}

#[async_trait]
impl InventoryProvider for FakeInventory {
    async fn snapshot(&self) -> Result<Vec<InventoryItem>> {
        if self.fail {
            return Err(anyhow!("library offline"));
        }
        Ok(self.items.clone())
    }
}

pub struct FakeWatchHistory {
    pub titles: Vec<WatchedTitle>,
    pub fail: bool,
}

#[async_trait]
impl WatchHistoryProvider for FakeWatchHistory {
    async fn recent(&self) -> Result<Vec<WatchedTitle>> {
        if self.fail {
            return Err(anyhow!("tautulli offline"));
        }
        Ok(self.titles.clone())
    }
}

pub fn watched(title: &str, year: i32) -> WatchedTitle {
    WatchedTitle {
        title: title.to_string(),
        year: Some(year),
    }
}

/// An [`InMemoryStore`] whose history writes, history reads or inventory
/// reads can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub fail_history_writes: AtomicBool,
    pub fail_history_reads: AtomicBool,
    pub fail_inventory_reads: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check(flag: &AtomicBool, what: &str) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(anyhow!("database is locked ({})", what));
    }
    Ok(())
}

#[async_trait]
impl Store for FlakyStore {
    async fn cached_resolution(&self, key: &ResolutionKey) -> Result<Option<CachedResolution>> {
        self.inner.cached_resolution(key).await
    }

    async fn upsert_resolution(&self, entry: &CachedResolution) -> Result<()> {
        self.inner.upsert_resolution(entry).await
    }

    async fn record_recommendation(
        &self,
        label: &str,
        key: CanonicalKey,
        at: DateTime<Utc>,
    ) -> Result<()> {
        check(&self.fail_history_writes, "record_recommendation")?;
        self.inner.record_recommendation(label, key, at).await
    }

    async fn recommended_since(
        &self,
        label: &str,
        since: DateTime<Utc>,
    ) -> Result<HashSet<CanonicalKey>> {
        check(&self.fail_history_reads, "recommended_since")?;
        self.inner.recommended_since(label, since).await
    }

    async fn history_entry(
        &self,
        label: &str,
        key: CanonicalKey,
    ) -> Result<Option<HistoryEntry>> {
        self.inner.history_entry(label, key).await
    }

    async fn history_for_label(&self, label: &str) -> Result<Vec<HistoryEntry>> {
        self.inner.history_for_label(label).await
    }

    async fn replace_inventory(&self, items: &[InventoryItem], at: DateTime<Utc>) -> Result<()> {
        self.inner.replace_inventory(items, at).await
    }

    async fn inventory_keys(&self) -> Result<HashSet<CanonicalKey>> {
        check(&self.fail_inventory_reads, "inventory_keys")?;
        self.inner.inventory_keys().await
    }

    async fn library_key_ids(&self) -> Result<HashMap<String, i64>> {
        self.inner.library_key_ids().await
    }

    async fn remember_library_key(
        &self,
        rating_key: &str,
        canonical_id: i64,
        medium: Medium,
    ) -> Result<()> {
        self.inner
            .remember_library_key(rating_key, canonical_id, medium)
            .await
    }

    async fn start_job(&self, mode: &str, at: DateTime<Utc>) -> Result<i64> {
        self.inner.start_job(mode, at).await
    }

    async fn finish_job(
        &self,
        job_id: i64,
        status: RunStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.finish_job(job_id, status, error, at).await
    }

    async fn start_category_run(&self, job_id: i64, label: &str, kind: &str) -> Result<i64> {
        self.inner.start_category_run(job_id, label, kind).await
    }

    async fn finish_category_run(
        &self,
        run_id: i64,
        status: RunStatus,
        output: Option<&ResolvedOutput>,
        error: Option<&str>,
    ) -> Result<()> {
        self.inner
            .finish_category_run(run_id, status, output, error)
            .await
    }

    async fn latest_job(&self) -> Result<Option<JobRun>> {
        self.inner.latest_job().await
    }

    async fn category_runs(&self, job_id: i64) -> Result<Vec<CategoryRun>> {
        self.inner.category_runs(job_id).await
    }

    async fn latest_category_output(&self, label: &str) -> Result<Option<ResolvedOutput>> {
        self.inner.latest_category_output(label).await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.inner.stats().await
    }
}

pub fn category(label: &str) -> CategoryConfig {
    CategoryConfig {
        label: label.to_string(),
        kind: "genre".to_string(),
        media_types: vec!["movie".to_string(), "tv".to_string()],
        include_genres: Vec::new(),
        exclude_genres: Vec::new(),
        keywords_prefer: Vec::new(),
        keywords_avoid: Vec::new(),
        mood_keywords: Vec::new(),
        seeds: Vec::new(),
    }
}
