//! Local SQLite item store.
//!
//! Uses rusqlite with WAL mode. Provides the embedded schema migrations and
//! an [`ItemStore`] implementation used when no remote database is
//! configured (and by the test suite).

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::item::{Item, KeyMatching, NaturalKey};
use crate::store::{ItemStore, KeyCandidate, ListOrder, OrderLine, StoreError, StoredItem};

/// Shared handle to the local database.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

pub const DB_FILE_NAME: &str = "inventory.db";

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

const ITEM_COLUMNS: &str = "id, item_name, category, default_supplier, supplier_alternative,
     order_quantity, measure_unit, default_quantity, brand_tag, created_at";

/// Initialize the database at `{data_dir}/inventory.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState, StoreError> {
    fs::create_dir_all(data_dir)
        .map_err(|e| StoreError::Migration(format!("Failed to create data dir: {e}")))?;

    let db_path = data_dir.join(DB_FILE_NAME);
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path).map_err(|e| {
                StoreError::Migration(format!("Database open failed after retry: {e}"))
            })?
        }
    };

    run_migrations(&conn).map_err(StoreError::Migration)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open an in-memory database with the full schema applied.
pub fn open_in_memory() -> Result<DbState, StoreError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    run_migrations(&conn).map_err(StoreError::Migration)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        debug!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: item catalogue.
///
/// `name_key` / `supplier_key` hold the normalized natural key so lookups in
/// normalized mode stay indexed.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            item_name TEXT NOT NULL,
            category TEXT NOT NULL,
            default_supplier TEXT NOT NULL,
            supplier_alternative TEXT,
            order_quantity TEXT,
            measure_unit TEXT,
            default_quantity TEXT,
            brand_tag TEXT,
            name_key TEXT NOT NULL,
            supplier_key TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_items_exact_key
            ON items(item_name, default_supplier);
        CREATE INDEX IF NOT EXISTS idx_items_normalized_key
            ON items(name_key, supplier_key);
        CREATE INDEX IF NOT EXISTS idx_items_created_at
            ON items(created_at);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1 (items)");
    Ok(())
}

/// Migration v2: order lines.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            item_name TEXT NOT NULL,
            quantity REAL NOT NULL CHECK(quantity > 0),
            category TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_orders_order_id ON orders(order_id);
        CREATE INDEX IF NOT EXISTS idx_orders_user_created
            ON orders(user_id, created_at);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2 (orders)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn stored_item_from_row(row: &Row<'_>) -> rusqlite::Result<StoredItem> {
    Ok(StoredItem {
        id: row.get(0)?,
        item: Item {
            name: row.get(1)?,
            category: row.get(2)?,
            default_supplier: row.get(3)?,
            supplier_alternative: row.get(4)?,
            order_quantity: row.get(5)?,
            measure_unit: row.get(6)?,
            default_quantity: row.get(7)?,
            brand_tag: row.get(8)?,
        },
        created_at: row.get(9)?,
    })
}

fn insert_item_row(conn: &Connection, item: &Item, timestamp: &str) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    let normalized = item.natural_key(KeyMatching::Normalized);
    conn.execute(
        "INSERT INTO items (
             id, item_name, category, default_supplier, supplier_alternative,
             order_quantity, measure_unit, default_quantity, brand_tag,
             name_key, supplier_key, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            id,
            item.name,
            item.category,
            item.default_supplier,
            item.supplier_alternative,
            item.order_quantity,
            item.measure_unit,
            item.default_quantity,
            item.brand_tag,
            normalized.name,
            normalized.supplier,
            timestamp,
        ],
    )?;
    Ok(id)
}

impl DbState {
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        f(&mut conn)
    }
}

#[async_trait]
impl ItemStore for DbState {
    fn name(&self) -> &'static str {
        "local database"
    }

    async fn list_items(&self, order: ListOrder) -> Result<Vec<StoredItem>, StoreError> {
        let direction = match order {
            ListOrder::OldestFirst => "ASC",
            ListOrder::NewestFirst => "DESC",
        };
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM items ORDER BY created_at {direction}, rowid {direction}"
            ))?;
            let rows = stmt.query_map([], stored_item_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    async fn find_key_candidates(
        &self,
        key: &NaturalKey,
    ) -> Result<Vec<KeyCandidate>, StoreError> {
        let sql = match key.matching {
            KeyMatching::Exact => {
                "SELECT id, item_name, default_supplier FROM items
                 WHERE item_name = ?1 AND default_supplier = ?2
                 ORDER BY created_at ASC, rowid ASC"
            }
            KeyMatching::Normalized => {
                "SELECT id, item_name, default_supplier FROM items
                 WHERE name_key = ?1 AND supplier_key = ?2
                 ORDER BY created_at ASC, rowid ASC"
            }
        };
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params![key.name, key.supplier], |row| {
                Ok(KeyCandidate {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    supplier: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Item>, StoreError> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    &format!(
                        "SELECT {ITEM_COLUMNS} FROM items WHERE item_name = ?1
                         ORDER BY created_at ASC, rowid ASC LIMIT 1"
                    ),
                    params![name],
                    stored_item_from_row,
                )
                .optional()?;
            Ok(found.map(|stored| stored.item))
        })
    }

    async fn insert_item(&self, item: &Item) -> Result<String, StoreError> {
        self.with_conn(|conn| Ok(insert_item_row(conn, item, &now_timestamp())?))
    }

    async fn update_item(&self, id: &str, item: &Item) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE items SET
                     category = ?2, supplier_alternative = ?3, order_quantity = ?4,
                     measure_unit = ?5, default_quantity = ?6, brand_tag = ?7,
                     updated_at = ?8
                 WHERE id = ?1",
                params![
                    id,
                    item.category,
                    item.supplier_alternative,
                    item.order_quantity,
                    item.measure_unit,
                    item.default_quantity,
                    item.brand_tag,
                    now_timestamp(),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows));
            }
            Ok(())
        })
    }

    async fn replace_all(&self, items: &[Item]) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM items", [])?;
            let timestamp = now_timestamp();
            for item in items {
                insert_item_row(&tx, item, &timestamp)?;
            }
            tx.commit()?;
            debug!(removed, inserted = items.len(), "items collection replaced");
            Ok(items.len())
        })
    }

    async fn insert_order_lines(&self, lines: &[OrderLine]) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for line in lines {
                tx.execute(
                    "INSERT INTO orders (order_id, user_id, item_name, quantity, category, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        line.order_id,
                        line.user_id,
                        line.item_name,
                        line.quantity,
                        line.category,
                        line.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn list_order_lines(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<OrderLine>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT order_id, user_id, item_name, quantity, category, created_at
                 FROM orders
                 WHERE (?1 IS NULL OR user_id = ?1)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, limit as i64], |row| {
                let raw_ts: String = row.get(5)?;
                let created_at = chrono::DateTime::parse_from_rfc3339(&raw_ts)
                    .map(|ts| ts.with_timezone(&Utc))
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            5,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                Ok(OrderLine {
                    order_id: row.get(0)?,
                    user_id: row.get(1)?,
                    item_name: row.get(2)?,
                    quantity: row.get(3)?,
                    category: row.get(4)?,
                    created_at,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .expect("pragma setup");
        conn
    }

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_migrations_to_latest() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        let tables = table_names(&conn);
        assert!(tables.contains(&"items".to_string()));
        assert!(tables.contains(&"orders".to_string()));

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = test_db();
        run_migrations(&conn).expect("first run");
        run_migrations(&conn).expect("second run");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, CURRENT_SCHEMA_VERSION as i64);
    }

    #[test]
    fn test_init_creates_file_db_in_wal_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = init(dir.path()).expect("init");
        assert!(db.db_path.exists());

        let conn = db.conn.lock().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_order_quantity_must_be_positive() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        let result = conn.execute(
            "INSERT INTO orders (order_id, user_id, item_name, quantity, created_at)
             VALUES ('o1', 'u1', 'Soap', 0, '2026-01-01T00:00:00.000Z')",
            [],
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_insert_then_find_candidates_by_mode() {
        let db = open_in_memory().expect("db");
        let id = db
            .insert_item(&Item::new(" Soap ", "Cleaning", "Pisey"))
            .await
            .expect("insert");

        let exact = NaturalKey::new("Soap", "pisey", KeyMatching::Exact);
        assert!(db.find_key_candidates(&exact).await.unwrap().is_empty());

        let normalized = NaturalKey::new("soap", "PISEY", KeyMatching::Normalized);
        let found = db.find_key_candidates(&normalized).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert_eq!(found[0].name, " Soap ");
    }

    #[tokio::test]
    async fn test_update_item_rewrites_non_key_fields_only() {
        let db = open_in_memory().expect("db");
        let id = db
            .insert_item(&Item::new("Soap", "Cleaning", "pisey"))
            .await
            .unwrap();

        let mut updated = Item::new("SOAP ", "Hygiene", "Pisey");
        updated.measure_unit = Some("bottle".into());
        db.update_item(&id, &updated).await.expect("update");

        let items = db.list_items(ListOrder::OldestFirst).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, id);
        assert_eq!(items[0].item.name, "Soap");
        assert_eq!(items[0].item.default_supplier, "pisey");
        assert_eq!(items[0].item.category, "Hygiene");
        assert_eq!(items[0].item.measure_unit.as_deref(), Some("bottle"));
    }

    #[tokio::test]
    async fn test_update_missing_row_is_an_error() {
        let db = open_in_memory().expect("db");
        let result = db
            .update_item("does-not-exist", &Item::new("Soap", "Cleaning", "pisey"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_items_orders_by_creation() {
        let db = open_in_memory().expect("db");
        db.replace_all(&[
            Item::new("A", "c", "s"),
            Item::new("B", "c", "s"),
            Item::new("C", "c", "s"),
        ])
        .await
        .unwrap();

        let oldest: Vec<String> = db
            .list_items(ListOrder::OldestFirst)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.item.name)
            .collect();
        assert_eq!(oldest, vec!["A", "B", "C"]);

        let newest: Vec<String> = db
            .list_items(ListOrder::NewestFirst)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.item.name)
            .collect();
        assert_eq!(newest, vec!["C", "B", "A"]);
    }

    #[tokio::test]
    async fn test_replace_all_discards_previous_rows() {
        let db = open_in_memory().expect("db");
        db.insert_item(&Item::new("Old", "c", "s")).await.unwrap();

        let count = db
            .replace_all(&[Item::new("New", "c", "s")])
            .await
            .unwrap();
        assert_eq!(count, 1);

        let items = db.list_items(ListOrder::OldestFirst).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item.name, "New");
    }

    #[tokio::test]
    async fn test_replace_all_rolls_back_on_failure() {
        let db = open_in_memory().expect("db");
        db.insert_item(&Item::new("Keep", "c", "s")).await.unwrap();

        {
            let conn = db.conn.lock().unwrap();
            conn.execute_batch(
                "CREATE TRIGGER reject_poison BEFORE INSERT ON items
                 WHEN NEW.item_name = 'poison'
                 BEGIN SELECT RAISE(ABORT, 'poisoned row'); END;",
            )
            .unwrap();
        }

        let result = db
            .replace_all(&[Item::new("Fine", "c", "s"), Item::new("poison", "c", "s")])
            .await;
        assert!(result.is_err());

        let items = db.list_items(ListOrder::OldestFirst).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item.name, "Keep");
    }

    #[tokio::test]
    async fn test_order_lines_round_trip_newest_first() {
        let db = open_in_memory().expect("db");
        let t0 = Utc::now() - chrono::Duration::minutes(5);
        let line = |order: &str, user: &str, name: &str, at| OrderLine {
            order_id: order.into(),
            user_id: user.into(),
            item_name: name.into(),
            quantity: 2.0,
            category: Some("Cleaning".into()),
            created_at: at,
        };
        db.insert_order_lines(&[line("o1", "u1", "Soap", t0)])
            .await
            .unwrap();
        db.insert_order_lines(&[line("o2", "u2", "Box", Utc::now())])
            .await
            .unwrap();

        let all = db.list_order_lines(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].order_id, "o2");

        let mine = db.list_order_lines(Some("u1"), 10).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].item_name, "Soap");
    }
}
