//! Exclusion filter.
//!
//! Decides which canonical keys must not be surfaced again for a category:
//!
//! - **History**: keys recommended under the same label whose
//!   `last_seen_at` falls within the trailing window (60 days by default).
//! - **Inventory**: keys present in the current library snapshot,
//!   regardless of label.
//! - **Same run**: keys already emitted earlier in the current pipeline
//!   run, added through [`ExclusionSet::mark_resolved`] before the history
//!   row is durably committed.
//!
//! The three sources are kept apart so a skip can be logged with its
//! reason.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};

use crate::models::CanonicalKey;
use crate::store::Store;

/// Out-of-the-box history window.
pub const DEFAULT_WINDOW_DAYS: u32 = 60;

/// Why a key was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    History,
    Inventory,
    SameRun,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::History => "recently recommended",
            ExclusionReason::Inventory => "already in library",
            ExclusionReason::SameRun => "duplicate within batch",
        }
    }
}

/// Computes [`ExclusionSet`]s from the store.
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    window: Duration,
}

impl Default for ExclusionFilter {
    fn default() -> Self {
        Self::with_window_days(DEFAULT_WINDOW_DAYS)
    }
}

impl ExclusionFilter {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn with_window_days(days: u32) -> Self {
        Self::new(Duration::days(i64::from(days)))
    }

    /// Snapshot the exclusions for `label` as of `now`.
    pub async fn compute(
        &self,
        store: &dyn Store,
        label: &str,
        now: DateTime<Utc>,
    ) -> Result<ExclusionSet> {
        // Windows reaching past the representable range cover all history.
        let since = now
            .checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let history = store
            .recommended_since(label, since)
            .await
            .with_context(|| format!("Failed to load recommendation history for '{}'", label))?;
        let inventory = store
            .inventory_keys()
            .await
            .context("Failed to load library inventory")?;

        Ok(ExclusionSet {
            history,
            inventory,
            same_run: HashSet::new(),
        })
    }
}

/// Exclusion state for one pipeline run, plus its mutable overlay.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    history: HashSet<CanonicalKey>,
    inventory: HashSet<CanonicalKey>,
    same_run: HashSet<CanonicalKey>,
}

impl ExclusionSet {
    /// The first source that excludes `key`, if any.
    pub fn reason(&self, key: &CanonicalKey) -> Option<ExclusionReason> {
        if self.same_run.contains(key) {
            Some(ExclusionReason::SameRun)
        } else if self.history.contains(key) {
            Some(ExclusionReason::History)
        } else if self.inventory.contains(key) {
            Some(ExclusionReason::Inventory)
        } else {
            None
        }
    }

    pub fn is_excluded(&self, key: &CanonicalKey) -> bool {
        self.reason(key).is_some()
    }

    /// Add a key emitted by the current run. Returns `false` if it was
    /// already in the overlay.
    pub fn mark_resolved(&mut self, key: CanonicalKey) -> bool {
        self.same_run.insert(key)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn inventory_len(&self) -> usize {
        self.inventory.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InventoryItem, Medium};
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn window_boundary_is_inclusive() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let inside = CanonicalKey::new(1, Medium::Movie);
        let outside = CanonicalKey::new(2, Medium::Movie);
        store
            .record_recommendation("Noir", inside, now - Duration::days(60))
            .await
            .unwrap();
        store
            .record_recommendation("Noir", outside, now - Duration::days(61))
            .await
            .unwrap();

        let set = ExclusionFilter::default()
            .compute(&store, "Noir", now)
            .await
            .unwrap();
        assert_eq!(set.reason(&inside), Some(ExclusionReason::History));
        assert!(!set.is_excluded(&outside));
    }

    #[tokio::test]
    async fn configurable_window_shrinks_history() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let key = CanonicalKey::new(7, Medium::Tv);
        store
            .record_recommendation("Noir", key, now - Duration::days(20))
            .await
            .unwrap();

        let set = ExclusionFilter::with_window_days(14)
            .compute(&store, "Noir", now)
            .await
            .unwrap();
        assert!(!set.is_excluded(&key));
    }

    #[tokio::test]
    async fn inventory_applies_to_every_label() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .replace_inventory(
                &[InventoryItem {
                    canonical_id: 99,
                    medium: Medium::Movie,
                }],
                now,
            )
            .await
            .unwrap();

        let set = ExclusionFilter::default()
            .compute(&store, "Anything", now)
            .await
            .unwrap();
        assert_eq!(
            set.reason(&CanonicalKey::new(99, Medium::Movie)),
            Some(ExclusionReason::Inventory)
        );
        assert!(!set.is_excluded(&CanonicalKey::new(99, Medium::Tv)));
        assert_eq!(set.inventory_len(), 1);
    }

    #[tokio::test]
    async fn oversized_window_covers_all_history() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let key = CanonicalKey::new(3, Medium::Movie);
        store
            .record_recommendation("Noir", key, now - Duration::days(365 * 50))
            .await
            .unwrap();

        let set = ExclusionFilter::with_window_days(u32::MAX)
            .compute(&store, "Noir", now)
            .await
            .unwrap();
        assert_eq!(set.reason(&key), Some(ExclusionReason::History));
    }

    #[test]
    fn overlay_excludes_later_duplicates() {
        let mut set = ExclusionSet::default();
        let key = CanonicalKey::new(87108, Medium::Tv);
        assert!(!set.is_excluded(&key));
        assert!(set.mark_resolved(key));
        assert!(!set.mark_resolved(key));
        assert_eq!(set.reason(&key), Some(ExclusionReason::SameRun));
    }
}
