use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS title_resolution_cache (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        year INTEGER NOT NULL,
        medium TEXT NOT NULL,
        canonical_id INTEGER NOT NULL,
        resolved_title TEXT NOT NULL,
        external_id TEXT,
        country TEXT,
        runtime_minutes INTEGER,
        vote_count INTEGER NOT NULL DEFAULT 0,
        vote_average REAL NOT NULL DEFAULT 0,
        genres_json TEXT NOT NULL DEFAULT '[]',
        keywords_json TEXT NOT NULL DEFAULT '[]',
        resolved_at TEXT NOT NULL,
        UNIQUE(title, year, medium)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS recommendation_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        label TEXT NOT NULL,
        canonical_id INTEGER NOT NULL,
        medium TEXT NOT NULL,
        first_seen_at TEXT NOT NULL,
        last_seen_at TEXT NOT NULL,
        UNIQUE(label, canonical_id, medium)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_history_label_seen ON recommendation_history(label, last_seen_at)",
    r#"
    CREATE TABLE IF NOT EXISTS library_inventory (
        canonical_id INTEGER NOT NULL,
        medium TEXT NOT NULL,
        present_at TEXT NOT NULL,
        UNIQUE(canonical_id, medium)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS library_key_cache (
        rating_key TEXT PRIMARY KEY,
        canonical_id INTEGER NOT NULL,
        medium TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_run (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        mode TEXT NOT NULL,
        status TEXT NOT NULL,
        error_msg TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS category_run (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id INTEGER NOT NULL,
        label TEXT NOT NULL,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        item_count INTEGER NOT NULL DEFAULT 0,
        error_msg TEXT,
        output_json TEXT,
        FOREIGN KEY (job_id) REFERENCES job_run(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_category_run_label ON category_run(label, status)",
];

/// Create every table and index. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
