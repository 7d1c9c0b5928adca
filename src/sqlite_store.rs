//! SQLite-backed [`Store`] implementation.
//!
//! Timestamps are stored as RFC 3339 UTC text with a fixed nanosecond
//! width, so string comparison in SQL matches chronological order.
//! Genres and keywords are stored as JSON arrays.

use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use curator_core::models::{
    CachedResolution, CanonicalKey, CategoryRun, HistoryEntry, InventoryItem, JobRun, Medium,
    ResolutionKey, ResolvedMetadata, ResolvedOutput, RunStatus, StoreStats,
};
use curator_core::store::Store;

use crate::config::Config;
use crate::{db, migrate};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `[db].path` and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool)
            .await
            .context("Failed to apply database schema")?;
        Ok(Self::new(pool))
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp in database: {}", raw))?
        .with_timezone(&Utc))
}

fn parse_medium(raw: &str) -> Result<Medium> {
    Ok(Medium::normalize(raw)?)
}

fn parse_status(raw: &str) -> Result<RunStatus> {
    RunStatus::parse(raw).ok_or_else(|| anyhow!("invalid run status in database: {}", raw))
}

fn json_set(raw: &str) -> Result<BTreeSet<String>> {
    serde_json::from_str(raw).with_context(|| format!("invalid JSON list in database: {}", raw))
}

fn history_from_row(row: &SqliteRow) -> Result<HistoryEntry> {
    let medium: String = row.get("medium");
    let first: String = row.get("first_seen_at");
    let last: String = row.get("last_seen_at");
    Ok(HistoryEntry {
        label: row.get("label"),
        canonical_id: row.get("canonical_id"),
        medium: parse_medium(&medium)?,
        first_seen_at: parse_ts(&first)?,
        last_seen_at: parse_ts(&last)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn cached_resolution(&self, key: &ResolutionKey) -> Result<Option<CachedResolution>> {
        let row = sqlx::query(
            r#"
            SELECT canonical_id, resolved_title, external_id, country, runtime_minutes,
                   vote_count, vote_average, genres_json, keywords_json, resolved_at
            FROM title_resolution_cache
            WHERE title = ? AND year = ? AND medium = ?
            ORDER BY resolved_at DESC
            LIMIT 1
            "#,
        )
        .bind(&key.title)
        .bind(key.year)
        .bind(key.medium.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let runtime: Option<i64> = row.get("runtime_minutes");
        let vote_count: i64 = row.get("vote_count");
        let genres: String = row.get("genres_json");
        let keywords: String = row.get("keywords_json");
        let resolved_at: String = row.get("resolved_at");

        Ok(Some(CachedResolution {
            key: key.clone(),
            metadata: ResolvedMetadata {
                canonical_id: row.get("canonical_id"),
                medium: key.medium,
                title: row.get("resolved_title"),
                external_id: row.get("external_id"),
                country: row.get("country"),
                runtime_minutes: runtime.and_then(|m| u32::try_from(m).ok()),
                vote_count: u32::try_from(vote_count).unwrap_or(0),
                vote_average: row.get("vote_average"),
                genres: json_set(&genres)?,
                keywords: json_set(&keywords)?,
            },
            resolved_at: parse_ts(&resolved_at)?,
        }))
    }

    async fn upsert_resolution(&self, entry: &CachedResolution) -> Result<()> {
        let meta = &entry.metadata;
        sqlx::query(
            r#"
            INSERT INTO title_resolution_cache (title, year, medium, canonical_id, resolved_title,
                                                external_id, country, runtime_minutes, vote_count,
                                                vote_average, genres_json, keywords_json, resolved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(title, year, medium) DO UPDATE SET
                canonical_id = excluded.canonical_id,
                resolved_title = excluded.resolved_title,
                external_id = excluded.external_id,
                country = excluded.country,
                runtime_minutes = excluded.runtime_minutes,
                vote_count = excluded.vote_count,
                vote_average = excluded.vote_average,
                genres_json = excluded.genres_json,
                keywords_json = excluded.keywords_json,
                resolved_at = excluded.resolved_at
            "#,
        )
        .bind(&entry.key.title)
        .bind(entry.key.year)
        .bind(entry.key.medium.as_str())
        .bind(meta.canonical_id)
        .bind(&meta.title)
        .bind(&meta.external_id)
        .bind(&meta.country)
        .bind(meta.runtime_minutes.map(i64::from))
        .bind(i64::from(meta.vote_count))
        .bind(meta.vote_average)
        .bind(serde_json::to_string(&meta.genres)?)
        .bind(serde_json::to_string(&meta.keywords)?)
        .bind(format_ts(entry.resolved_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_recommendation(
        &self,
        label: &str,
        key: CanonicalKey,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let ts = format_ts(at);
        sqlx::query(
            r#"
            INSERT INTO recommendation_history (label, canonical_id, medium, first_seen_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(label, canonical_id, medium) DO UPDATE SET
                last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(label)
        .bind(key.canonical_id)
        .bind(key.medium.as_str())
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recommended_since(
        &self,
        label: &str,
        since: DateTime<Utc>,
    ) -> Result<HashSet<CanonicalKey>> {
        let rows = sqlx::query(
            "SELECT canonical_id, medium FROM recommendation_history WHERE label = ? AND last_seen_at >= ?",
        )
        .bind(label)
        .bind(format_ts(since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let medium: String = row.get("medium");
                Ok(CanonicalKey::new(row.get("canonical_id"), parse_medium(&medium)?))
            })
            .collect()
    }

    async fn history_entry(
        &self,
        label: &str,
        key: CanonicalKey,
    ) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query(
            r#"
            SELECT label, canonical_id, medium, first_seen_at, last_seen_at
            FROM recommendation_history
            WHERE label = ? AND canonical_id = ? AND medium = ?
            "#,
        )
        .bind(label)
        .bind(key.canonical_id)
        .bind(key.medium.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(history_from_row).transpose()
    }

    async fn history_for_label(&self, label: &str) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT label, canonical_id, medium, first_seen_at, last_seen_at
            FROM recommendation_history
            WHERE label = ?
            ORDER BY last_seen_at DESC, canonical_id ASC
            "#,
        )
        .bind(label)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(history_from_row).collect()
    }

    async fn replace_inventory(&self, items: &[InventoryItem], at: DateTime<Utc>) -> Result<()> {
        let ts = format_ts(at);
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM library_inventory")
            .execute(&mut *tx)
            .await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO library_inventory (canonical_id, medium, present_at)
                VALUES (?, ?, ?)
                ON CONFLICT(canonical_id, medium) DO UPDATE SET present_at = excluded.present_at
                "#,
            )
            .bind(item.canonical_id)
            .bind(item.medium.as_str())
            .bind(&ts)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn inventory_keys(&self) -> Result<HashSet<CanonicalKey>> {
        let rows = sqlx::query("SELECT canonical_id, medium FROM library_inventory")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let medium: String = row.get("medium");
                Ok(CanonicalKey::new(row.get("canonical_id"), parse_medium(&medium)?))
            })
            .collect()
    }

    async fn library_key_ids(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query("SELECT rating_key, canonical_id FROM library_key_cache")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("rating_key"), row.get("canonical_id")))
            .collect())
    }

    async fn remember_library_key(
        &self,
        rating_key: &str,
        canonical_id: i64,
        medium: Medium,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO library_key_cache (rating_key, canonical_id, medium)
            VALUES (?, ?, ?)
            ON CONFLICT(rating_key) DO UPDATE SET
                canonical_id = excluded.canonical_id,
                medium = excluded.medium
            "#,
        )
        .bind(rating_key)
        .bind(canonical_id)
        .bind(medium.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn start_job(&self, mode: &str, at: DateTime<Utc>) -> Result<i64> {
        let result =
            sqlx::query("INSERT INTO job_run (started_at, mode, status) VALUES (?, ?, ?)")
                .bind(format_ts(at))
                .bind(mode)
                .bind(RunStatus::Running.as_str())
                .execute(&self.pool)
                .await?;

        Ok(result.last_insert_rowid())
    }

    async fn finish_job(
        &self,
        job_id: i64,
        status: RunStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE job_run SET status = ?, error_msg = ?, finished_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(format_ts(at))
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn start_category_run(&self, job_id: i64, label: &str, kind: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO category_run (job_id, label, kind, status) VALUES (?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(label)
        .bind(kind)
        .bind(RunStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn finish_category_run(
        &self,
        run_id: i64,
        status: RunStatus,
        output: Option<&ResolvedOutput>,
        error: Option<&str>,
    ) -> Result<()> {
        let item_count = output.map(|o| o.items.len() as i64).unwrap_or(0);
        let output_json = output.map(serde_json::to_string).transpose()?;

        sqlx::query(
            "UPDATE category_run SET status = ?, item_count = ?, error_msg = ?, output_json = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(item_count)
        .bind(error)
        .bind(output_json)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_job(&self) -> Result<Option<JobRun>> {
        let row = sqlx::query(
            "SELECT id, started_at, finished_at, mode, status, error_msg FROM job_run ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let started_at: String = row.get("started_at");
        let finished_at: Option<String> = row.get("finished_at");
        let status: String = row.get("status");

        Ok(Some(JobRun {
            id: row.get("id"),
            started_at: parse_ts(&started_at)?,
            finished_at: finished_at.as_deref().map(parse_ts).transpose()?,
            mode: row.get("mode"),
            status: parse_status(&status)?,
            error: row.get("error_msg"),
        }))
    }

    async fn category_runs(&self, job_id: i64) -> Result<Vec<CategoryRun>> {
        let rows = sqlx::query(
            "SELECT id, job_id, label, kind, status, item_count, error_msg FROM category_run WHERE job_id = ? ORDER BY id ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(CategoryRun {
                    id: row.get("id"),
                    job_id: row.get("job_id"),
                    label: row.get("label"),
                    kind: row.get("kind"),
                    status: parse_status(&status)?,
                    item_count: row.get("item_count"),
                    error: row.get("error_msg"),
                })
            })
            .collect()
    }

    async fn latest_category_output(&self, label: &str) -> Result<Option<ResolvedOutput>> {
        let raw: Option<String> = sqlx::query_scalar(
            r#"
            SELECT output_json FROM category_run
            WHERE label = ? AND status = ? AND output_json IS NOT NULL
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(label)
        .bind(RunStatus::Completed.as_str())
        .fetch_optional(&self.pool)
        .await?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .with_context(|| format!("corrupt stored output for category '{}'", label))
        })
        .transpose()
    }

    async fn stats(&self) -> Result<StoreStats> {
        let count = |table: &'static str| {
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            let pool = self.pool.clone();
            async move {
                let n: i64 = sqlx::query_scalar(&sql).fetch_one(&pool).await?;
                Ok::<i64, anyhow::Error>(n)
            }
        };

        Ok(StoreStats {
            cached_resolutions: count("title_resolution_cache").await?,
            history_entries: count("recommendation_history").await?,
            inventory_items: count("library_inventory").await?,
            job_runs: count("job_run").await?,
        })
    }
}
