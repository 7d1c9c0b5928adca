//! Resolution pipeline: turns one category's candidates into a
//! deduplicated, enriched [`ResolvedOutput`].
//!
//! Candidates are handled in input order. A candidate that fails to
//! resolve, or that resolves to an excluded key, is skipped. Survivors are
//! emitted, recorded in history, and added to the run's exclusion overlay
//! so a later duplicate in the same batch is dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use curator_core::exclusion::ExclusionFilter;
use curator_core::models::{Candidate, ResolvedItem, ResolvedOutput};
use curator_core::store::Store;

use crate::resolver::MetadataResolver;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Every candidate was dropped. The category ran but found nothing new.
    #[error("no recommendations could be resolved for '{category}'")]
    NothingResolved { category: String },

    /// Exclusion state could not be read.
    #[error("failed to load exclusion state")]
    Store(#[source] anyhow::Error),
}

pub struct ResolutionPipeline {
    resolver: MetadataResolver,
    store: Arc<dyn Store>,
    exclusion: ExclusionFilter,
}

impl ResolutionPipeline {
    pub fn new(resolver: MetadataResolver, store: Arc<dyn Store>, exclusion: ExclusionFilter) -> Self {
        Self {
            resolver,
            store,
            exclusion,
        }
    }

    pub async fn resolve(
        &self,
        candidates: &[Candidate],
        label: &str,
    ) -> Result<ResolvedOutput, PipelineError> {
        self.resolve_at(candidates, label, Utc::now()).await
    }

    /// Run the pipeline as of `now`. History rows and the exclusion window
    /// are both anchored to this instant.
    pub async fn resolve_at(
        &self,
        candidates: &[Candidate],
        label: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedOutput, PipelineError> {
        let mut exclusions = self
            .exclusion
            .compute(self.store.as_ref(), label, now)
            .await
            .map_err(PipelineError::Store)?;

        debug!(
            category = label,
            history = exclusions.history_len(),
            inventory = exclusions.inventory_len(),
            "exclusion state loaded"
        );

        let mut items = Vec::new();

        for candidate in candidates {
            let metadata = match self
                .resolver
                .resolve_at(&candidate.title, candidate.year, &candidate.medium, now)
                .await
            {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(
                        category = label,
                        title = %candidate.title,
                        year = candidate.year,
                        medium = %candidate.medium,
                        error = %e,
                        "skipping unresolved candidate"
                    );
                    continue;
                }
            };

            let key = metadata.key();
            if let Some(reason) = exclusions.reason(&key) {
                debug!(
                    category = label,
                    title = %candidate.title,
                    canonical_id = key.canonical_id,
                    medium = %key.medium,
                    reason = reason.as_str(),
                    "excluded"
                );
                continue;
            }

            if let Err(e) = self.store.record_recommendation(label, key, now).await {
                warn!(
                    category = label,
                    canonical_id = key.canonical_id,
                    medium = %key.medium,
                    error = %e,
                    "failed to record recommendation history; item may resurface in a later run"
                );
            }

            exclusions.mark_resolved(key);
            items.push(ResolvedItem::from_resolution(candidate, metadata));
        }

        if items.is_empty() {
            return Err(PipelineError::NothingResolved {
                category: label.to_string(),
            });
        }

        info!(
            category = label,
            candidates = candidates.len(),
            resolved = items.len(),
            "category resolved"
        );

        Ok(ResolvedOutput {
            category_label: label.to_string(),
            resolved_at: now,
            items,
        })
    }
}
