//! Storage seam shared by the local SQLite store and the Supabase REST store.
//!
//! The reconciliation code never talks to a concrete backend; it receives a
//! `&dyn ItemStore` constructed once at start-up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::{Item, NaturalKey};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database lock poisoned")]
    Lock,
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Database migration failed: {0}")]
    Migration(String),
    /// Transport-level failure, already rendered as a user-facing message.
    #[error("{0}")]
    Network(String),
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },
    #[error("Invalid response from store: {0}")]
    Decode(String),
}

/// Sort direction for item listings, by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    OldestFirst,
    NewestFirst,
}

/// An item as persisted, with its store-assigned identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredItem {
    pub id: String,
    #[serde(flatten)]
    pub item: Item,
    pub created_at: String,
}

/// Minimal projection returned by natural-key lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCandidate {
    pub id: String,
    pub name: String,
    pub supplier: String,
}

/// One persisted order line. Lines sharing `order_id` form one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub order_id: String,
    pub user_id: String,
    pub item_name: String,
    pub quantity: f64,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Human-readable backend name used in log lines and sync messages.
    fn name(&self) -> &'static str;

    async fn list_items(&self, order: ListOrder) -> Result<Vec<StoredItem>, StoreError>;

    /// Rows that may match `key`, oldest first. Implementations may return a
    /// superset; callers filter with [`NaturalKey::matches`].
    async fn find_key_candidates(&self, key: &NaturalKey)
        -> Result<Vec<KeyCandidate>, StoreError>;

    /// First item whose name equals `name` exactly.
    async fn find_by_name(&self, name: &str) -> Result<Option<Item>, StoreError>;

    /// Insert a new row and return its identifier.
    async fn insert_item(&self, item: &Item) -> Result<String, StoreError>;

    /// Overwrite category and the optional fields of row `id`. The stored
    /// name and supplier are left as they are.
    async fn update_item(&self, id: &str, item: &Item) -> Result<(), StoreError>;

    /// Replace the whole item collection with `items`. A failure must leave
    /// the previous collection in place.
    async fn replace_all(&self, items: &[Item]) -> Result<usize, StoreError>;

    async fn insert_order_lines(&self, lines: &[OrderLine]) -> Result<(), StoreError>;

    /// Order lines newest first, optionally restricted to one user.
    async fn list_order_lines(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<OrderLine>, StoreError>;
}
