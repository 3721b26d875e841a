//! Sequential insert-or-update of item batches.
//!
//! Records are written one at a time so two rows sharing a natural key never
//! race each other. Per-record failures are counted and the batch carries on;
//! nothing is rolled back.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::item::{Item, KeyMatching};
use crate::resolver::{resolve, Existence};
use crate::store::ItemStore;

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Skipped,
    Failed,
}

/// Running totals for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSummary {
    pub successful: usize,
    pub skipped: usize,
    pub errors: usize,
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertSummary {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => {
                self.inserted += 1;
                self.successful += 1;
            }
            UpsertOutcome::Updated => {
                self.updated += 1;
                self.successful += 1;
            }
            UpsertOutcome::Skipped => self.skipped += 1,
            UpsertOutcome::Failed => self.errors += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.successful + self.skipped + self.errors
    }

    /// Completion message shown to the user.
    pub fn message(&self) -> String {
        format!(
            "Successfully processed {} items, skipped {} items, {} errors",
            self.successful, self.skipped, self.errors
        )
    }
}

/// Progress after each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }
}

pub struct UpsertEngine<'a> {
    store: &'a dyn ItemStore,
    matching: KeyMatching,
}

impl<'a> UpsertEngine<'a> {
    pub fn new(store: &'a dyn ItemStore, matching: KeyMatching) -> Self {
        Self { store, matching }
    }

    /// Apply one record.
    pub async fn upsert_one(&self, item: &Item) -> UpsertOutcome {
        let missing = item.missing_fields();
        if !missing.is_empty() {
            debug!(name = %item.name, ?missing, "skipping record with missing fields");
            return UpsertOutcome::Skipped;
        }

        match resolve(self.store, item, self.matching).await {
            Err(e) => {
                warn!(name = %item.name, error = %e, "existence check failed");
                UpsertOutcome::Failed
            }
            Ok(Existence::Present(id)) => match self.store.update_item(&id, item).await {
                Ok(()) => UpsertOutcome::Updated,
                Err(e) => {
                    warn!(name = %item.name, id = %id, error = %e, "update failed");
                    UpsertOutcome::Failed
                }
            },
            Ok(Existence::Absent) => match self.store.insert_item(item).await {
                Ok(_) => UpsertOutcome::Inserted,
                Err(e) => {
                    warn!(name = %item.name, error = %e, "insert failed");
                    UpsertOutcome::Failed
                }
            },
        }
    }

    /// Apply `items` in order, calling `on_progress` after every record.
    pub async fn run(
        &self,
        items: &[Item],
        mut on_progress: impl FnMut(Progress) + Send,
    ) -> UpsertSummary {
        let total = items.len();
        let mut summary = UpsertSummary::default();

        for item in items {
            let outcome = self.upsert_one(item).await;
            summary.record(outcome);
            on_progress(Progress {
                processed: summary.processed(),
                total,
            });
        }

        info!(
            store = self.store.name(),
            total,
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            errors = summary.errors,
            "upsert batch finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::test_support::{Failures, FlakyStore};
    use crate::store::ListOrder;

    fn batch() -> Vec<Item> {
        vec![
            Item::new("Soap", "Cleaning", "pisey"),
            Item::new("Box", "Packaging", "pp distributor"),
        ]
    }

    #[tokio::test]
    async fn test_invalid_records_are_skipped_without_store_calls() {
        // Every write would fail, so a skipped record proves no write happened.
        let store = FlakyStore::new(Failures {
            lookups: true,
            writes_for: vec!["Soap".into(), "".into()],
            ..Failures::default()
        });
        let engine = UpsertEngine::new(&store, KeyMatching::Exact);

        let items = vec![
            Item::new("", "Cleaning", "pisey"),
            Item::new("Soap", "", "pisey"),
            Item::new("Soap", "Cleaning", " "),
        ];
        let summary = engine.run(&items, |_| {}).await;
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.successful, 0);
    }

    #[tokio::test]
    async fn test_same_key_updates_instead_of_duplicating() {
        let store = db::open_in_memory().unwrap();
        let engine = UpsertEngine::new(&store, KeyMatching::Exact);

        engine.run(&[Item::new("Soap", "Cleaning", "pisey")], |_| {}).await;
        let mut changed = Item::new("Soap", "Hygiene", "pisey");
        changed.brand_tag = Some("Lux".into());
        let summary = engine.run(&[changed.clone()], |_| {}).await;

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.inserted, 0);
        let stored = store.list_items(ListOrder::OldestFirst).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].item, changed);
    }

    #[tokio::test]
    async fn test_normalized_update_keeps_stored_key_text() {
        let store = db::open_in_memory().unwrap();
        let engine = UpsertEngine::new(&store, KeyMatching::Normalized);

        engine.run(&[Item::new("Soap", "Cleaning", "pisey")], |_| {}).await;
        let summary = engine
            .run(&[Item::new(" soap ", "Hygiene", "PISEY")], |_| {})
            .await;

        assert_eq!(summary.updated, 1);
        let stored = store.list_items(ListOrder::OldestFirst).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].item, Item::new("Soap", "Hygiene", "pisey"));
    }

    #[tokio::test]
    async fn test_different_supplier_persists_both() {
        let store = db::open_in_memory().unwrap();
        let engine = UpsertEngine::new(&store, KeyMatching::Normalized);

        let items = vec![
            Item::new("Soap", "Cleaning", "pisey"),
            Item::new("Soap", "Cleaning", "makro"),
        ];
        let summary = engine.run(&items, |_| {}).await;

        assert_eq!(summary.inserted, 2);
        assert_eq!(store.list_items(ListOrder::OldestFirst).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rerunning_a_batch_is_idempotent() {
        let store = db::open_in_memory().unwrap();
        let engine = UpsertEngine::new(&store, KeyMatching::Normalized);

        let first = engine.run(&batch(), |_| {}).await;
        let before = store.list_items(ListOrder::OldestFirst).await.unwrap();
        let second = engine.run(&batch(), |_| {}).await;
        let after = store.list_items(ListOrder::OldestFirst).await.unwrap();

        assert_eq!(first.inserted, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 2);
        let ids = |rows: &[crate::store::StoredItem]| {
            rows.iter().map(|r| (r.id.clone(), r.item.clone())).collect::<Vec<_>>()
        };
        assert_eq!(ids(&before), ids(&after));
    }

    #[tokio::test]
    async fn test_lookup_and_write_failures_are_counted_and_batch_continues() {
        let store = FlakyStore::new(Failures {
            writes_for: vec!["Box".into()],
            ..Failures::default()
        });
        let engine = UpsertEngine::new(&store, KeyMatching::Exact);

        let items = vec![
            Item::new("Box", "Packaging", "pp distributor"),
            Item::new("Soap", "Cleaning", "pisey"),
        ];
        let summary = engine.run(&items, |_| {}).await;
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.successful, 1);

        let lookups_down = FlakyStore::new(Failures {
            lookups: true,
            ..Failures::default()
        });
        let engine = UpsertEngine::new(&lookups_down, KeyMatching::Exact);
        let summary = engine.run(&items, |_| {}).await;
        assert_eq!(summary.errors, 2);
        assert!(lookups_down
            .inner
            .list_items(ListOrder::OldestFirst)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_progress_reported_after_every_record() {
        let store = db::open_in_memory().unwrap();
        let engine = UpsertEngine::new(&store, KeyMatching::Exact);

        let mut seen = Vec::new();
        let mut items = batch();
        items.insert(1, Item::new("Broken", "", ""));
        engine.run(&items, |p| seen.push(p)).await;

        assert_eq!(
            seen,
            vec![
                Progress { processed: 1, total: 3 },
                Progress { processed: 2, total: 3 },
                Progress { processed: 3, total: 3 },
            ]
        );
        assert_eq!(seen[2].fraction(), 1.0);
    }

    #[test]
    fn test_summary_message() {
        let mut summary = UpsertSummary::default();
        summary.record(UpsertOutcome::Inserted);
        summary.record(UpsertOutcome::Updated);
        summary.record(UpsertOutcome::Skipped);
        assert_eq!(
            summary.message(),
            "Successfully processed 2 items, skipped 1 items, 0 errors"
        );
    }
}
