//! Batch runner: one pass over every configured category.
//!
//! At most one batch runs at a time. The guard is a single-slot
//! `tokio::sync::Mutex` taken with `try_lock_owned`, so a second caller is
//! refused with [`BatchError::AlreadyRunning`] instead of queueing. The
//! HTTP surface takes a [`BatchPermit`] before answering `202` and hands it
//! to the spawned task.
//!
//! A batch records a `job_run`, refreshes the library inventory (a failed
//! refresh keeps the previous snapshot), reads recent watch history into a
//! taste profile (a failed read leaves it empty), then processes categories
//! in order. Each category gets a `category_run` that ends `completed` or
//! `failed`; a failed category never stops the next one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use curator_core::exclusion::ExclusionFilter;
use curator_core::models::{ResolvedOutput, RunStatus};
use curator_core::store::Store;

use crate::catalog::TmdbClient;
use crate::config::{CategoryConfig, Config};
use crate::generator::{CandidateSource, ChatCandidateSource, TasteProfile};
use crate::inventory::{self, InventoryProvider, PlexInventory};
use crate::pipeline::{PipelineError, ResolutionPipeline};
use crate::resolver::MetadataResolver;
use crate::watch_history::{self, TautulliHistory, WatchHistoryProvider};

/// Recent watches sent with each generator request unless `[history]`
/// says otherwise.
const DEFAULT_TASTE_TITLES: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("a batch is already running")]
    AlreadyRunning,

    #[error("failed to record batch run")]
    Store(#[source] anyhow::Error),
}

/// Proof that the caller holds the batch slot. Dropping it frees the slot.
pub struct BatchPermit {
    _guard: OwnedMutexGuard<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryOutcome {
    pub label: String,
    pub status: RunStatus,
    pub item_count: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub job_id: i64,
    pub categories: Vec<CategoryOutcome>,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.categories
            .iter()
            .filter(|c| c.status == RunStatus::Failed)
            .count()
    }
}

pub struct BatchRunner {
    store: Arc<dyn Store>,
    pipeline: ResolutionPipeline,
    source: Arc<dyn CandidateSource>,
    inventory: Option<Arc<dyn InventoryProvider>>,
    watch_history: Option<Arc<dyn WatchHistoryProvider>>,
    taste_titles: usize,
    categories: Vec<CategoryConfig>,
    recs_per_category: usize,
    guard: Arc<Mutex<()>>,
}

impl BatchRunner {
    pub fn new(
        store: Arc<dyn Store>,
        pipeline: ResolutionPipeline,
        source: Arc<dyn CandidateSource>,
        categories: Vec<CategoryConfig>,
        recs_per_category: usize,
    ) -> Self {
        Self {
            store,
            pipeline,
            source,
            inventory: None,
            watch_history: None,
            taste_titles: DEFAULT_TASTE_TITLES,
            categories,
            recs_per_category,
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_inventory(mut self, provider: Arc<dyn InventoryProvider>) -> Self {
        self.inventory = Some(provider);
        self
    }

    /// Feed recent watches, at most `max_titles` of them, into every
    /// generator request.
    pub fn with_watch_history(
        mut self,
        provider: Arc<dyn WatchHistoryProvider>,
        max_titles: usize,
    ) -> Self {
        self.watch_history = Some(provider);
        self.taste_titles = max_titles;
        self
    }

    /// Wire the production providers from config. Requires `TMDB_API_KEY`
    /// and `LLM_API_KEY`; `PLEX_TOKEN` only when `[library]` is set and
    /// `TAUTULLI_API_KEY` only when `[history]` is set.
    pub fn from_config(config: &Config, store: Arc<dyn Store>) -> Result<Self> {
        let catalog = TmdbClient::new(&config.catalog).context("Catalog client unavailable")?;
        let resolver = MetadataResolver::new(Arc::new(catalog), store.clone())
            .with_call_timeout(Duration::from_secs(config.catalog.timeout_secs));
        let pipeline = ResolutionPipeline::new(
            resolver,
            store.clone(),
            ExclusionFilter::with_window_days(config.exclusion.window_days),
        );
        let source =
            ChatCandidateSource::new(&config.generator).context("Generator client unavailable")?;

        let mut runner = Self::new(
            store.clone(),
            pipeline,
            Arc::new(source),
            config.categories.clone(),
            config.generator.recs_per_category,
        );

        if let Some(library) = &config.library {
            let plex = PlexInventory::new(library, store).context("Library client unavailable")?;
            runner = runner.with_inventory(Arc::new(plex));
        }

        if let Some(history) = &config.history {
            let tautulli =
                TautulliHistory::new(history).context("Watch history client unavailable")?;
            runner = runner.with_watch_history(Arc::new(tautulli), history.max_titles);
        }

        Ok(runner)
    }

    pub fn is_running(&self) -> bool {
        self.guard.try_lock().is_err()
    }

    /// Take the batch slot without waiting.
    pub fn try_acquire(&self) -> Result<BatchPermit, BatchError> {
        self.guard
            .clone()
            .try_lock_owned()
            .map(|guard| BatchPermit { _guard: guard })
            .map_err(|_| BatchError::AlreadyRunning)
    }

    pub async fn run(&self, mode: &str) -> Result<BatchReport, BatchError> {
        let permit = self.try_acquire()?;
        self.run_with(permit, mode).await
    }

    /// Run a batch under an already-acquired permit.
    pub async fn run_with(&self, permit: BatchPermit, mode: &str) -> Result<BatchReport, BatchError> {
        let job_id = self
            .store
            .start_job(mode, Utc::now())
            .await
            .map_err(BatchError::Store)?;
        info!(job_id, mode, categories = self.categories.len(), "batch started");

        if let Some(provider) = &self.inventory {
            if let Err(e) = inventory::refresh(provider.as_ref(), self.store.as_ref()).await {
                warn!(error = %format!("{:#}", e), "inventory refresh failed, keeping previous snapshot");
            }
        }

        let taste = self.taste_profile().await;

        let mut outcomes = Vec::with_capacity(self.categories.len());
        for category in &self.categories {
            outcomes.push(self.run_category(job_id, category, &taste).await);
        }

        let report = BatchReport {
            job_id,
            categories: outcomes,
        };

        if let Err(e) = self
            .store
            .finish_job(job_id, RunStatus::Completed, None, Utc::now())
            .await
        {
            error!(job_id, error = %e, "failed to close job run");
        }

        info!(
            job_id,
            completed = report.categories.len() - report.failed(),
            failed = report.failed(),
            "batch finished"
        );
        drop(permit);
        Ok(report)
    }

    async fn taste_profile(&self) -> TasteProfile {
        let provider = match &self.watch_history {
            Some(provider) => provider,
            None => return TasteProfile::default(),
        };
        match provider.recent().await {
            Ok(watched) => TasteProfile {
                recent_watches: watch_history::taste_profile(&watched, self.taste_titles),
            },
            Err(e) => {
                warn!(error = %format!("{:#}", e), "watch history unavailable, continuing without taste profile");
                TasteProfile::default()
            }
        }
    }

    async fn run_category(
        &self,
        job_id: i64,
        category: &CategoryConfig,
        taste: &TasteProfile,
    ) -> CategoryOutcome {
        let label = category.label.as_str();
        info!(category = label, kind = %category.kind, "processing category");

        let run_id = match self
            .store
            .start_category_run(job_id, label, &category.kind)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                error!(category = label, error = %e, "failed to record category run");
                None
            }
        };

        let result = self.resolve_category(category, taste).await;

        let (status, output, message) = match &result {
            Ok(output) => (RunStatus::Completed, Some(output), None),
            Err(e) => {
                let message = format!("{:#}", e);
                error!(category = label, error = %message, "category failed");
                (RunStatus::Failed, None, Some(message))
            }
        };

        if let Some(run_id) = run_id {
            if let Err(e) = self
                .store
                .finish_category_run(run_id, status, output, message.as_deref())
                .await
            {
                warn!(category = label, error = %e, "failed to update category run");
            }
        }

        CategoryOutcome {
            label: label.to_string(),
            status,
            item_count: output.map(|o| o.items.len()).unwrap_or(0),
            error: message,
        }
    }

    async fn resolve_category(
        &self,
        category: &CategoryConfig,
        taste: &TasteProfile,
    ) -> Result<ResolvedOutput> {
        let candidates = self
            .source
            .generate(category, self.recs_per_category, taste)
            .await
            .context("Candidate generation failed")?;

        match self.pipeline.resolve(&candidates, &category.label).await {
            Ok(output) => Ok(output),
            Err(e @ PipelineError::NothingResolved { .. }) => Err(e.into()),
            Err(e) => Err(anyhow::Error::new(e).context("Resolution failed")),
        }
    }
}
