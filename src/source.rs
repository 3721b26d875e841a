//! Source selection: primary store first, public CSV export as fallback.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::csv_import::parse_items;
use crate::item::Item;
use crate::store::{ItemStore, ListOrder};
use crate::supabase::friendly_error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to fetch CSV data: {0}")]
    Csv(String),
    #[error("Failed to fetch items from both database ({primary}) and CSV ({fallback})")]
    Unavailable { primary: String, fallback: String },
}

/// Anything that can hand back the spreadsheet's CSV export.
#[async_trait]
pub trait CsvSource: Send + Sync {
    async fn fetch_csv(&self) -> Result<String, SourceError>;
}

/// Published-to-web CSV export fetched over HTTP.
pub struct CsvExportClient {
    client: Client,
    url: String,
}

impl CsvExportClient {
    pub fn new(url: &str) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Csv(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.trim().to_string(),
        })
    }
}

#[async_trait]
impl CsvSource for CsvExportClient {
    async fn fetch_csv(&self) -> Result<String, SourceError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SourceError::Csv(friendly_error(&self.url, &e)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Csv(format!("HTTP {}", status.as_u16())));
        }
        resp.text()
            .await
            .map_err(|e| SourceError::Csv(friendly_error(&self.url, &e)))
    }
}

/// Stand-in used when no CSV export URL is configured.
pub struct NoCsvSource;

#[async_trait]
impl CsvSource for NoCsvSource {
    async fn fetch_csv(&self) -> Result<String, SourceError> {
        Err(SourceError::Csv(format!("{} is not set", crate::config::ENV_CSV_URL)))
    }
}

/// Uniform item list plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemListing {
    pub items: Vec<Item>,
    pub using_fallback: bool,
}

async fn read_fallback(csv: &dyn CsvSource) -> Result<Vec<Item>, SourceError> {
    let text = csv.fetch_csv().await?;
    let items = parse_items(&text).map_err(|e| SourceError::Csv(e.to_string()))?;
    debug!(rows = items.len(), "loaded items from CSV fallback");
    Ok(items)
}

/// Load the full item list, newest first when it comes from the store.
///
/// Every call re-tries the primary store unless `force_fallback` is set.
pub async fn load_items(
    store: &dyn ItemStore,
    csv: &dyn CsvSource,
    force_fallback: bool,
) -> Result<ItemListing, SourceError> {
    if force_fallback {
        info!("fallback mode forced, reading CSV export");
        let items = read_fallback(csv).await?;
        return Ok(ItemListing {
            items,
            using_fallback: true,
        });
    }

    let primary_err = match store.list_items(ListOrder::NewestFirst).await {
        Ok(rows) => {
            return Ok(ItemListing {
                items: rows.into_iter().map(|r| r.item).collect(),
                using_fallback: false,
            })
        }
        Err(e) => e,
    };

    warn!(store = store.name(), error = %primary_err, "primary read failed, falling back to CSV");
    match read_fallback(csv).await {
        Ok(items) => Ok(ItemListing {
            items,
            using_fallback: true,
        }),
        Err(fallback_err) => Err(SourceError::Unavailable {
            primary: primary_err.to_string(),
            fallback: fallback_err.to_string(),
        }),
    }
}

/// Find one item by exact name, searching the CSV export when the store is
/// unreachable. `None` means it exists in neither.
pub async fn lookup_item(
    store: &dyn ItemStore,
    csv: &dyn CsvSource,
    name: &str,
) -> Result<Option<Item>, SourceError> {
    let primary_err = match store.find_by_name(name).await {
        Ok(found) => return Ok(found),
        Err(e) => e,
    };

    warn!(name, error = %primary_err, "item lookup failed, searching CSV export");
    match read_fallback(csv).await {
        Ok(items) => Ok(items.into_iter().find(|item| item.name == name)),
        Err(fallback_err) => Err(SourceError::Unavailable {
            primary: primary_err.to_string(),
            fallback: fallback_err.to_string(),
        }),
    }
}
