//! Existence check by natural key.

use tracing::warn;

use crate::item::{Item, KeyMatching};
use crate::store::{ItemStore, StoreError};

/// Whether a record with the same natural key is already stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Existence {
    Absent,
    Present(String),
}

/// Look up `item`'s (name, supplier) pair in `store`.
///
/// A failed lookup is returned as `Err` so callers never mistake a transient
/// failure for "absent" and create a duplicate. When several rows share the
/// key the oldest one wins.
pub async fn resolve(
    store: &dyn ItemStore,
    item: &Item,
    matching: KeyMatching,
) -> Result<Existence, StoreError> {
    let key = item.natural_key(matching);
    let candidates = store.find_key_candidates(&key).await?;

    let mut matches = candidates
        .into_iter()
        .filter(|c| key.matches(&c.name, &c.supplier));

    let Some(first) = matches.next() else {
        return Ok(Existence::Absent);
    };

    let extra = matches.count();
    if extra > 0 {
        warn!(
            name = %item.name,
            supplier = %item.default_supplier,
            duplicates = extra + 1,
            "natural key matches several rows, updating the oldest"
        );
    }
    Ok(Existence::Present(first.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::test_support::{Failures, FlakyStore};

    #[tokio::test]
    async fn test_absent_when_store_is_empty() {
        let db = db::open_in_memory().unwrap();
        let item = Item::new("Soap", "Cleaning", "pisey");
        assert_eq!(
            resolve(&db, &item, KeyMatching::Exact).await.unwrap(),
            Existence::Absent
        );
    }

    #[tokio::test]
    async fn test_present_returns_oldest_matching_id() {
        let db = db::open_in_memory().unwrap();
        let first = db
            .insert_item(&Item::new("Soap", "Cleaning", "pisey"))
            .await
            .unwrap();
        db.insert_item(&Item::new("Soap", "Other", "pisey"))
            .await
            .unwrap();

        let item = Item::new("Soap", "Cleaning", "pisey");
        assert_eq!(
            resolve(&db, &item, KeyMatching::Exact).await.unwrap(),
            Existence::Present(first)
        );
    }

    #[tokio::test]
    async fn test_different_supplier_is_absent() {
        let db = db::open_in_memory().unwrap();
        db.insert_item(&Item::new("Soap", "Cleaning", "pisey"))
            .await
            .unwrap();

        let item = Item::new("Soap", "Cleaning", "makro");
        assert_eq!(
            resolve(&db, &item, KeyMatching::Normalized).await.unwrap(),
            Existence::Absent
        );
    }

    #[tokio::test]
    async fn test_case_difference_depends_on_matching_mode() {
        let db = db::open_in_memory().unwrap();
        let id = db
            .insert_item(&Item::new("Soap", "Cleaning", "pisey"))
            .await
            .unwrap();

        let item = Item::new(" soap", "Cleaning", "PISEY");
        assert_eq!(
            resolve(&db, &item, KeyMatching::Exact).await.unwrap(),
            Existence::Absent
        );
        assert_eq!(
            resolve(&db, &item, KeyMatching::Normalized).await.unwrap(),
            Existence::Present(id)
        );
    }

    #[tokio::test]
    async fn test_lookup_failure_is_an_error_not_absent() {
        let store = FlakyStore::new(Failures {
            lookups: true,
            ..Failures::default()
        });
        let item = Item::new("Soap", "Cleaning", "pisey");
        let result = resolve(&store, &item, KeyMatching::Exact).await;
        assert!(matches!(result, Err(StoreError::Network(_))));
    }
}
