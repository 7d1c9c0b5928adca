//! `curator status` and `curator history`.
//!
//! Prints row counts, the latest batch with its category runs, and the
//! recommendation history of a single category.

use anyhow::Result;
use chrono::{DateTime, Utc};

use curator_core::models::RunStatus;
use curator_core::store::Store;

use crate::config::Config;

pub async fn run_status(config: &Config, store: &dyn Store) -> Result<()> {
    let stats = store.stats().await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Curator status");
    println!("==============");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Cached titles: {}", stats.cached_resolutions);
    println!("  History rows:  {}", stats.history_entries);
    println!("  Library items: {}", stats.inventory_items);
    println!("  Batches:       {}", stats.job_runs);

    let job = match store.latest_job().await? {
        Some(job) => job,
        None => {
            println!();
            println!("  No batch has run yet.");
            println!();
            return Ok(());
        }
    };

    let now = Utc::now();
    println!();
    println!(
        "  Latest batch #{} ({}, {}) started {}",
        job.id,
        job.mode,
        job.status.as_str(),
        format_relative(job.started_at, now)
    );

    let runs = store.category_runs(job.id).await?;
    if !runs.is_empty() {
        println!();
        println!("  {:<28} {:>10} {:>6}   {}", "CATEGORY", "STATUS", "ITEMS", "ERROR");
        println!("  {}", "-".repeat(72));
        for run in &runs {
            let error = match run.status {
                RunStatus::Failed => run.error.as_deref().unwrap_or("unknown error"),
                _ => "",
            };
            println!(
                "  {:<28} {:>10} {:>6}   {}",
                run.label,
                run.status.as_str(),
                run.item_count,
                error
            );
        }
    }

    println!();
    Ok(())
}

pub async fn run_history(store: &dyn Store, label: &str, window_days: u32) -> Result<()> {
    let entries = store.history_for_label(label).await?;
    if entries.is_empty() {
        println!("No recommendations recorded for '{}'.", label);
        return Ok(());
    }

    let now = Utc::now();
    let cutoff = now - chrono::Duration::days(i64::from(window_days));

    println!(
        "  {:<10} {:>6} {:<18} {:<18} {}",
        "ID", "MEDIUM", "FIRST SEEN", "LAST SEEN", "EXCLUDED"
    );
    println!("  {}", "-".repeat(68));
    for entry in &entries {
        println!(
            "  {:<10} {:>6} {:<18} {:<18} {}",
            entry.canonical_id,
            entry.medium.as_str(),
            format_ts(entry.first_seen_at),
            format_ts(entry.last_seen_at),
            if entry.last_seen_at >= cutoff { "yes" } else { "no" }
        );
    }
    println!();
    println!("{} entries for '{}'", entries.len(), label);
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

/// "3 hours ago" style, falling back to an absolute date past 30 days.
fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();
    if delta < 0 {
        return format_ts(ts);
    }

    let plural = |n: i64| if n == 1 { "" } else { "s" };
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        format!("{} min{} ago", delta / 60, plural(delta / 60))
    } else if delta < 86400 {
        format!("{} hour{} ago", delta / 3600, plural(delta / 3600))
    } else if delta < 86400 * 30 {
        format!("{} day{} ago", delta / 86400, plural(delta / 86400))
    } else {
        format_ts(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn relative_times() {
        let now = Utc::now();
        assert_eq!(format_relative(now - Duration::seconds(5), now), "just now");
        assert_eq!(format_relative(now - Duration::minutes(1), now), "1 min ago");
        assert_eq!(format_relative(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(format_relative(now - Duration::days(2), now), "2 days ago");
        let old = now - Duration::days(90);
        assert_eq!(format_relative(old, now), format_ts(old));
    }

    #[test]
    fn byte_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
