//! POS inventory sync service.
//!
//! Keeps the item catalog consistent between a primary store (Supabase or a
//! local SQLite file), a Google Sheets spreadsheet and its published CSV
//! export. The same operations are exposed over HTTP ([`commands::router`])
//! and from the command line.

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod commands;
pub mod config;
pub mod csv_import;
pub mod db;
pub mod diagnostics;
pub mod item;
pub mod local_view;
pub mod orders;
pub mod resolver;
pub mod sheets;
pub mod source;
pub mod storage;
pub mod store;
pub mod supabase;
pub mod sync;
pub mod upsert;

pub use commands::{router, AppState, SharedState};
pub use config::AppConfig;
pub use item::{Item, KeyMatching};
pub use store::ItemStore;

use crate::config::ConfigError;
use crate::db::DbState;
use crate::sheets::{ServiceAccount, SheetsApi, SheetsClient, SheetsError};
use crate::source::{CsvExportClient, CsvSource, NoCsvSource, SourceError};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sheets(#[from] SheetsError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

// ============================================================================
// Logging
// ============================================================================

/// Structured logging to the console and a daily rolling file in `log_dir`.
pub fn init_logging(log_dir: &Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pos_inventory_sync=debug"));

    // Prune before the appender opens today's file
    diagnostics::prune_old_logs(log_dir);
    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Dropping the guard stops the writer thread; the process owns it until exit.
    std::mem::forget(guard);
}

// ============================================================================
// State
// ============================================================================

/// Build the clients every handler shares.
///
/// Supabase is the primary store when configured, otherwise the local
/// database under `data_dir`. Sheets access is optional; sync requests fail
/// without it.
pub fn build_state(config: &AppConfig) -> Result<AppState, StartupError> {
    let (store, db): (Arc<dyn ItemStore>, Option<Arc<DbState>>) = match &config.supabase {
        Some(supabase) => {
            let client = supabase::SupabaseStore::new(&supabase.url, &supabase.service_key)?;
            (Arc::new(client) as Arc<dyn ItemStore>, None)
        }
        None => {
            let db = Arc::new(db::init(&config.data_dir)?);
            (db.clone() as Arc<dyn ItemStore>, Some(db))
        }
    };

    let sheets = match &config.google {
        Some(google) => {
            let account = ServiceAccount::from_json(&google.credentials_json)?;
            let client = SheetsClient::new(account, &google.spreadsheet_id)?;
            Some(Arc::new(client) as Arc<dyn SheetsApi>)
        }
        None => None,
    };

    let csv: Arc<dyn CsvSource> = match &config.csv_url {
        Some(url) => Arc::new(CsvExportClient::new(url)?),
        None => Arc::new(NoCsvSource),
    };

    info!(
        store = store.name(),
        sheets = sheets.is_some(),
        csv_fallback = config.csv_url.is_some(),
        key_matching = %config.key_matching,
        "service state ready"
    );

    Ok(AppState {
        store,
        sheets,
        csv,
        key_matching: config.key_matching,
        db,
    })
}
