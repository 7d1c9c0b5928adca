//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Inventory
//! replacement swaps the whole set under one write lock, so readers never
//! observe a partial snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    CachedResolution, CanonicalKey, CategoryRun, HistoryEntry, InventoryItem, JobRun, Medium,
    ResolutionKey, ResolvedOutput, RunStatus, StoreStats,
};

use super::Store;

struct StoredCategoryRun {
    run: CategoryRun,
    output: Option<ResolvedOutput>,
}

/// In-memory store for tests.
pub struct InMemoryStore {
    cache: RwLock<HashMap<ResolutionKey, CachedResolution>>,
    history: RwLock<HashMap<(String, CanonicalKey), HistoryEntry>>,
    inventory: RwLock<HashSet<CanonicalKey>>,
    library_keys: RwLock<HashMap<String, (i64, Medium)>>,
    jobs: RwLock<Vec<JobRun>>,
    category_runs: RwLock<Vec<StoredCategoryRun>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            inventory: RwLock::new(HashSet::new()),
            library_keys: RwLock::new(HashMap::new()),
            jobs: RwLock::new(Vec::new()),
            category_runs: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn cached_resolution(&self, key: &ResolutionKey) -> Result<Option<CachedResolution>> {
        Ok(read(&self.cache)?.get(key).cloned())
    }

    async fn upsert_resolution(&self, entry: &CachedResolution) -> Result<()> {
        write(&self.cache)?.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn record_recommendation(
        &self,
        label: &str,
        key: CanonicalKey,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut history = write(&self.history)?;
        history
            .entry((label.to_string(), key))
            .and_modify(|e| e.last_seen_at = at)
            .or_insert_with(|| HistoryEntry {
                label: label.to_string(),
                canonical_id: key.canonical_id,
                medium: key.medium,
                first_seen_at: at,
                last_seen_at: at,
            });
        Ok(())
    }

    async fn recommended_since(
        &self,
        label: &str,
        since: DateTime<Utc>,
    ) -> Result<HashSet<CanonicalKey>> {
        Ok(read(&self.history)?
            .iter()
            .filter(|((l, _), e)| l == label && e.last_seen_at >= since)
            .map(|((_, key), _)| *key)
            .collect())
    }

    async fn history_entry(
        &self,
        label: &str,
        key: CanonicalKey,
    ) -> Result<Option<HistoryEntry>> {
        Ok(read(&self.history)?
            .get(&(label.to_string(), key))
            .cloned())
    }

    async fn history_for_label(&self, label: &str) -> Result<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> = read(&self.history)?
            .values()
            .filter(|e| e.label == label)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(entries)
    }

    async fn replace_inventory(&self, items: &[InventoryItem], _at: DateTime<Utc>) -> Result<()> {
        let fresh: HashSet<CanonicalKey> = items.iter().map(InventoryItem::key).collect();
        *write(&self.inventory)? = fresh;
        Ok(())
    }

    async fn inventory_keys(&self) -> Result<HashSet<CanonicalKey>> {
        Ok(read(&self.inventory)?.clone())
    }

    async fn library_key_ids(&self) -> Result<HashMap<String, i64>> {
        Ok(read(&self.library_keys)?
            .iter()
            .map(|(k, (id, _))| (k.clone(), *id))
            .collect())
    }

    async fn remember_library_key(
        &self,
        rating_key: &str,
        canonical_id: i64,
        medium: Medium,
    ) -> Result<()> {
        write(&self.library_keys)?.insert(rating_key.to_string(), (canonical_id, medium));
        Ok(())
    }

    async fn start_job(&self, mode: &str, at: DateTime<Utc>) -> Result<i64> {
        let mut jobs = write(&self.jobs)?;
        let id = jobs.len() as i64 + 1;
        jobs.push(JobRun {
            id,
            started_at: at,
            finished_at: None,
            mode: mode.to_string(),
            status: RunStatus::Running,
            error: None,
        });
        Ok(id)
    }

    async fn finish_job(
        &self,
        job_id: i64,
        status: RunStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut jobs = write(&self.jobs)?;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| anyhow!("no job run with id {}", job_id))?;
        job.status = status;
        job.finished_at = Some(at);
        job.error = error.map(str::to_string);
        Ok(())
    }

    async fn start_category_run(&self, job_id: i64, label: &str, kind: &str) -> Result<i64> {
        let mut runs = write(&self.category_runs)?;
        let id = runs.len() as i64 + 1;
        runs.push(StoredCategoryRun {
            run: CategoryRun {
                id,
                job_id,
                label: label.to_string(),
                kind: kind.to_string(),
                status: RunStatus::Running,
                item_count: 0,
                error: None,
            },
            output: None,
        });
        Ok(id)
    }

    async fn finish_category_run(
        &self,
        run_id: i64,
        status: RunStatus,
        output: Option<&ResolvedOutput>,
        error: Option<&str>,
    ) -> Result<()> {
        let mut runs = write(&self.category_runs)?;
        let stored = runs
            .iter_mut()
            .find(|r| r.run.id == run_id)
            .ok_or_else(|| anyhow!("no category run with id {}", run_id))?;
        stored.run.status = status;
        stored.run.item_count = output.map(|o| o.items.len() as i64).unwrap_or(0);
        stored.run.error = error.map(str::to_string);
        stored.output = output.cloned();
        Ok(())
    }

    async fn latest_job(&self) -> Result<Option<JobRun>> {
        Ok(read(&self.jobs)?.last().cloned())
    }

    async fn category_runs(&self, job_id: i64) -> Result<Vec<CategoryRun>> {
        Ok(read(&self.category_runs)?
            .iter()
            .filter(|r| r.run.job_id == job_id)
            .map(|r| r.run.clone())
            .collect())
    }

    async fn latest_category_output(&self, label: &str) -> Result<Option<ResolvedOutput>> {
        Ok(read(&self.category_runs)?
            .iter()
            .rev()
            .find(|r| r.run.label == label && r.run.status == RunStatus::Completed)
            .and_then(|r| r.output.clone()))
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            cached_resolutions: read(&self.cache)?.len() as i64,
            history_entries: read(&self.history)?.len() as i64,
            inventory_items: read(&self.inventory)?.len() as i64,
            job_runs: read(&self.jobs)?.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(id: i64) -> CanonicalKey {
        CanonicalKey::new(id, Medium::Movie)
    }

    #[tokio::test]
    async fn repeated_recommendation_bumps_last_seen() {
        let store = InMemoryStore::new();
        let first = Utc::now() - Duration::days(10);
        let second = Utc::now();

        store
            .record_recommendation("True Crime", key(42), first)
            .await
            .unwrap();
        store
            .record_recommendation("True Crime", key(42), second)
            .await
            .unwrap();

        let rows = store.history_for_label("True Crime").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].first_seen_at, first);
        assert_eq!(rows[0].last_seen_at, second);
    }

    #[tokio::test]
    async fn history_is_scoped_by_label_and_cutoff() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .record_recommendation("A", key(1), now - Duration::days(90))
            .await
            .unwrap();
        store
            .record_recommendation("A", key(2), now - Duration::days(5))
            .await
            .unwrap();
        store.record_recommendation("B", key(3), now).await.unwrap();

        let recent = store
            .recommended_since("A", now - Duration::days(60))
            .await
            .unwrap();
        assert_eq!(recent, HashSet::from([key(2)]));
    }

    #[tokio::test]
    async fn replace_inventory_discards_previous_snapshot() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .replace_inventory(
                &[InventoryItem {
                    canonical_id: 1,
                    medium: Medium::Movie,
                }],
                now,
            )
            .await
            .unwrap();
        store
            .replace_inventory(
                &[InventoryItem {
                    canonical_id: 2,
                    medium: Medium::Tv,
                }],
                now,
            )
            .await
            .unwrap();

        let keys = store.inventory_keys().await.unwrap();
        assert_eq!(keys, HashSet::from([CanonicalKey::new(2, Medium::Tv)]));
    }

    #[tokio::test]
    async fn latest_output_skips_failed_runs() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let job = store.start_job("oneshot", now).await.unwrap();
        let ok = store.start_category_run(job, "Docudrama", "genre").await.unwrap();
        let output = ResolvedOutput {
            category_label: "Docudrama".into(),
            resolved_at: now,
            items: vec![],
        };
        store
            .finish_category_run(ok, RunStatus::Completed, Some(&output), None)
            .await
            .unwrap();
        let bad = store.start_category_run(job, "Docudrama", "genre").await.unwrap();
        store
            .finish_category_run(bad, RunStatus::Failed, None, Some("boom"))
            .await
            .unwrap();

        let latest = store.latest_category_output("Docudrama").await.unwrap();
        assert_eq!(latest, Some(output));
    }
}
