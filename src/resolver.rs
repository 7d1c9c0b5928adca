//! Metadata resolver: maps a loose `(title, year, medium)` triple onto a
//! canonical catalog record.
//!
//! Lookup order:
//!
//! 1. Normalize the medium (`"Show"` → tv, `"film"` → movie, ...).
//! 2. Read the resolution cache. A hit returns the stored record with no
//!    catalog call. An unreadable cache counts as a miss.
//! 3. Search the catalog and take the first hit. Zero hits is
//!    [`ResolveError::NotFound`].
//! 4. Fetch details and keywords. Either may fail; the record is built
//!    from whatever came back.
//! 5. Upsert the full record into the cache. A record missing details or
//!    keywords is returned but not cached, so the next resolution retries
//!    the enrichment. A failed write is logged and the resolution still
//!    succeeds.
//!
//! Every catalog call runs under its own timeout.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use curator_core::models::{
    CachedResolution, Medium, ResolutionKey, ResolvedMetadata, UnknownMedium,
};
use curator_core::store::Store;

use crate::catalog::{CatalogProvider, TitleDetails};
use crate::error::ProviderError;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    UnknownMedium(#[from] UnknownMedium),

    #[error("no catalog match for '{title}' ({year}, {medium})")]
    NotFound {
        title: String,
        year: i32,
        medium: Medium,
    },

    #[error("catalog lookup failed for '{title}' ({year}, {medium})")]
    Provider {
        title: String,
        year: i32,
        medium: Medium,
        #[source]
        source: ProviderError,
    },
}

pub struct MetadataResolver {
    catalog: Arc<dyn CatalogProvider>,
    store: Arc<dyn Store>,
    call_timeout: Duration,
}

impl MetadataResolver {
    pub fn new(catalog: Arc<dyn CatalogProvider>, store: Arc<dyn Store>) -> Self {
        Self {
            catalog,
            store,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub async fn resolve(
        &self,
        title: &str,
        year: i32,
        medium: &str,
    ) -> Result<ResolvedMetadata, ResolveError> {
        self.resolve_at(title, year, medium, Utc::now()).await
    }

    /// Resolve with an explicit cache timestamp.
    pub async fn resolve_at(
        &self,
        title: &str,
        year: i32,
        medium: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedMetadata, ResolveError> {
        let medium = Medium::normalize(medium)?;
        let key = ResolutionKey::new(title, year, medium);

        match self.store.cached_resolution(&key).await {
            Ok(Some(hit)) => {
                debug!(title, year, %medium, canonical_id = hit.metadata.canonical_id, "cache hit");
                return Ok(hit.metadata);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(title, year, %medium, error = %e, "cache read failed, treating as miss");
            }
        }

        let provider_err = |source| ResolveError::Provider {
            title: title.to_string(),
            year,
            medium,
            source,
        };

        let hits = self
            .timed(self.catalog.search(title, year, medium))
            .await
            .map_err(provider_err)?;

        let hit = hits
            .into_iter()
            .next()
            .ok_or_else(|| ResolveError::NotFound {
                title: title.to_string(),
                year,
                medium,
            })?;

        let (details, keywords) = tokio::join!(
            self.timed(self.catalog.details(hit.catalog_id, medium)),
            self.timed(self.catalog.keywords(hit.catalog_id, medium)),
        );

        let complete = details.is_ok() && keywords.is_ok();
        let details = details.unwrap_or_else(|e| {
            warn!(title, year, %medium, canonical_id = hit.catalog_id, error = %e, "details lookup failed, continuing without");
            TitleDetails::default()
        });
        let keywords = keywords.unwrap_or_else(|e| {
            warn!(title, year, %medium, canonical_id = hit.catalog_id, error = %e, "keyword lookup failed, continuing without");
            Vec::new()
        });

        let metadata = ResolvedMetadata {
            canonical_id: hit.catalog_id,
            medium,
            title: if hit.title.trim().is_empty() {
                title.to_string()
            } else {
                hit.title
            },
            external_id: details.imdb_id,
            country: details.country,
            runtime_minutes: details.runtime_minutes,
            vote_count: hit.vote_count,
            vote_average: hit.vote_average,
            genres: details.genres.into_iter().collect::<BTreeSet<_>>(),
            keywords: keywords.into_iter().collect::<BTreeSet<_>>(),
        };

        if complete {
            let entry = CachedResolution {
                key,
                metadata: metadata.clone(),
                resolved_at: now,
            };
            if let Err(e) = self.store.upsert_resolution(&entry).await {
                warn!(title, year, %medium, error = %e, "failed to write resolution cache");
            }
        } else {
            debug!(title, year, %medium, canonical_id = metadata.canonical_id, "partial record not cached");
        }

        debug!(title, year, %medium, canonical_id = metadata.canonical_id, "resolved via catalog");
        Ok(metadata)
    }

    async fn timed<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| ProviderError::Timeout(self.call_timeout))?
    }
}
