//! Spreadsheet <-> store synchronisation.
//!
//! Three directions, each a read step and a write step that can fail
//! independently:
//!
//! - pull: the sheet replaces the store's item collection.
//! - push: the store overwrites the sheet, header row first.
//! - two-way: sheet rows are merged into the store by natural key (the sheet
//!   wins on conflict), then the merged store is pushed back.
//!
//! Each call acquires its own access token.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

use crate::item::{Item, KeyMatching, CSV_COLUMNS, SHEET_WIDTH};
use crate::sheets::{AccessToken, SheetsApi, SheetsError, SHEET_RANGE};
use crate::store::{ItemStore, ListOrder, StoreError};
use crate::upsert::UpsertEngine;

pub const INVALID_ACTION_MESSAGE: &str =
    "Invalid action. Use: sync-from-sheets, sync-to-sheets, or two-way-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    FromSheets,
    ToSheets,
    TwoWay,
}

impl SyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FromSheets => "sync-from-sheets",
            Self::ToSheets => "sync-to-sheets",
            Self::TwoWay => "two-way-sync",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync-from-sheets" => Ok(Self::FromSheets),
            "sync-to-sheets" => Ok(Self::ToSheets),
            "two-way-sync" => Ok(Self::TwoWay),
            _ => Err(SyncError::InvalidAction),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{}", INVALID_ACTION_MESSAGE)]
    InvalidAction,
    #[error("No data found in Google Sheets")]
    EmptySheet,
    #[error("No items found in {0}")]
    EmptyStore(&'static str),
    #[error(transparent)]
    Sheets(#[from] SheetsError),
    #[error("Failed to fetch items from {store}: {source}")]
    Fetch {
        store: &'static str,
        source: StoreError,
    },
    #[error("Failed to insert items: {0}")]
    Replace(StoreError),
    #[error("{errors} items could not be merged; Google Sheets was not updated")]
    Merge { errors: usize },
}

impl SyncError {
    /// Errors caused by the request or by empty inputs rather than by a
    /// failing dependency.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAction | Self::EmptySheet | Self::EmptyStore(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub message: String,
}

impl SyncReport {
    fn ok(message: String) -> Self {
        Self {
            success: true,
            message,
        }
    }
}

/// Rows after the header, normalized, with invalid rows dropped.
fn sheet_items(rows: &[Vec<String>]) -> (Vec<Item>, usize) {
    let mut skipped = 0;
    let items = rows
        .iter()
        .skip(1)
        .map(|row| Item::from_sheet_row(row))
        .filter(|item| {
            let valid = item.is_valid();
            if !valid {
                skipped += 1;
            }
            valid
        })
        .collect();
    (items, skipped)
}

pub struct SyncOrchestrator<'a> {
    store: &'a dyn ItemStore,
    sheets: &'a dyn SheetsApi,
    matching: KeyMatching,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(store: &'a dyn ItemStore, sheets: &'a dyn SheetsApi, matching: KeyMatching) -> Self {
        Self {
            store,
            sheets,
            matching,
        }
    }

    pub async fn run(&self, action: SyncAction) -> Result<SyncReport, SyncError> {
        info!(%action, store = self.store.name(), "sync started");
        let result = match action {
            SyncAction::FromSheets => self.pull().await,
            SyncAction::ToSheets => self.push().await,
            SyncAction::TwoWay => self.two_way().await,
        };
        match &result {
            Ok(report) => info!(%action, message = %report.message, "sync finished"),
            Err(e) => warn!(%action, error = %e, "sync failed"),
        }
        result
    }

    /// Replace the store's items with the sheet's rows.
    pub async fn pull(&self) -> Result<SyncReport, SyncError> {
        let token = self.sheets.access_token().await?;
        let rows = self.sheets.read_range(&token, SHEET_RANGE).await?;
        if rows.is_empty() {
            return Err(SyncError::EmptySheet);
        }

        let (items, skipped) = sheet_items(&rows);
        if skipped > 0 {
            warn!(skipped, "dropped sheet rows with missing required fields");
        }
        let count = self
            .store
            .replace_all(&items)
            .await
            .map_err(SyncError::Replace)?;

        Ok(SyncReport::ok(format!(
            "Synced {count} items from Google Sheets to {}",
            self.store.name()
        )))
    }

    /// Overwrite the sheet with the store's items, oldest first.
    pub async fn push(&self) -> Result<SyncReport, SyncError> {
        let items = self.list_store_items().await?;
        if items.is_empty() {
            return Err(SyncError::EmptyStore(self.store.name()));
        }

        let token = self.sheets.access_token().await?;
        let written = self.write_sheet(&token, &items).await?;
        Ok(SyncReport::ok(format!(
            "Synced {written} items from {} to Google Sheets",
            self.store.name()
        )))
    }

    /// Merge sheet rows into the store, then write the merged store back.
    pub async fn two_way(&self) -> Result<SyncReport, SyncError> {
        let token = self.sheets.access_token().await?;
        let rows = self.sheets.read_range(&token, SHEET_RANGE).await?;

        let summary = UpsertEngine::new(self.store, self.matching)
            .run(&sheet_items(&rows).0, |_| {})
            .await;
        if summary.errors > 0 {
            return Err(SyncError::Merge {
                errors: summary.errors,
            });
        }

        let items = self.list_store_items().await?;
        let written = if items.is_empty() {
            0
        } else {
            self.write_sheet(&token, &items).await?
        };

        Ok(SyncReport::ok(format!(
            "Two-way sync completed: {} new, {} updated in {}, {written} items written to Google Sheets",
            summary.inserted,
            summary.updated,
            self.store.name()
        )))
    }

    async fn list_store_items(&self) -> Result<Vec<Item>, SyncError> {
        let rows = self
            .store
            .list_items(ListOrder::OldestFirst)
            .await
            .map_err(|source| SyncError::Fetch {
                store: self.store.name(),
                source,
            })?;
        Ok(rows.into_iter().map(|r| r.item).collect())
    }

    /// Header plus one row per item. Blank rows are appended up to the sheet's
    /// current length so a shrinking store leaves no stale rows behind.
    ///
    /// The length read only sizes the padding: if it fails the write still
    /// goes ahead unpadded.
    async fn write_sheet(&self, token: &AccessToken, items: &[Item]) -> Result<usize, SyncError> {
        let existing = match self.sheets.read_range(token, SHEET_RANGE).await {
            Ok(rows) => rows.len(),
            Err(e) => {
                warn!(error = %e, "could not read sheet length, stale rows may remain");
                0
            }
        };

        let mut values: Vec<Vec<String>> = Vec::with_capacity(items.len().max(existing) + 1);
        values.push(CSV_COLUMNS.iter().map(|c| c.to_string()).collect());
        values.extend(items.iter().map(Item::to_sheet_row));
        while values.len() < existing {
            values.push(vec![String::new(); SHEET_WIDTH]);
        }

        self.sheets.write_range(token, SHEET_RANGE, &values).await?;
        Ok(items.len())
    }
}
