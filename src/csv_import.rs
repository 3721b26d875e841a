//! CSV parsing, batch import and export.

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{info, warn};

use crate::item::{Item, KeyMatching};
use crate::store::ItemStore;
use crate::upsert::{Progress, UpsertEngine, UpsertSummary};

/// Rows shown before an import is confirmed.
pub const PREVIEW_ROWS: usize = 10;

/// Columns written by [`export_csv`].
pub const EXPORT_COLUMNS: [&str; 3] = ["Item_name", "category", "default_supplier"];

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("The CSV file contains no valid data")]
    Empty,
    #[error("CSV parsing error: {0}")]
    Parse(#[from] csv::Error),
    #[error("CSV write error: {0}")]
    Write(String),
}

/// Parse CSV text with a header row into items. Blank lines are skipped and
/// ragged rows are tolerated; unknown columns are ignored.
pub fn parse_items(text: &str) -> Result<Vec<Item>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let mut items = Vec::new();
    for record in reader.records() {
        let record = record?;
        // Only a bare empty line is dropped; a row of empty cells is kept so
        // the upsert counts it as skipped.
        if record.len() == 1 && record[0].is_empty() {
            continue;
        }
        items.push(Item::from_csv_record(&headers, &record));
    }
    Ok(items)
}

/// First [`PREVIEW_ROWS`] parsed rows.
pub fn preview(text: &str) -> Result<Vec<Item>, ImportError> {
    let mut items = parse_items(text)?;
    items.truncate(PREVIEW_ROWS);
    Ok(items)
}

/// Parse `text` and upsert every row into `store`.
pub async fn import_csv(
    store: &dyn ItemStore,
    matching: KeyMatching,
    text: &str,
    on_progress: impl FnMut(Progress) + Send,
) -> Result<UpsertSummary, ImportError> {
    let items = parse_items(text)?;
    if items.is_empty() {
        warn!("CSV import contained no rows");
        return Err(ImportError::Empty);
    }

    info!(rows = items.len(), store = store.name(), "importing CSV");
    let summary = UpsertEngine::new(store, matching)
        .run(&items, on_progress)
        .await;
    Ok(summary)
}

/// Serialize items with the short export layout.
pub fn export_csv(items: &[Item]) -> Result<String, ImportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(EXPORT_COLUMNS)?;
    for item in items {
        writer.write_record([&item.name, &item.category, &item.default_supplier])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ImportError::Write(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ImportError::Write(e.to_string()))
}

/// Download name for an export made on `date`.
pub fn export_file_name(date: NaiveDate) -> String {
    format!("inventory-{}.csv", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::ListOrder;

    const THREE_ROWS: &str = "Item_name,category,default_supplier,measure_unit\n\
Soap,Cleaning,pisey,bottle\n\
Gloves,Cleaning,,box\n\
Box,Packaging,pp distributor,\n";

    #[test]
    fn test_parse_items_skips_blank_lines() {
        let text = "Item_name,category,default_supplier\n\nSoap,Cleaning,pisey\n\n";
        let items = parse_items(text).unwrap();
        assert_eq!(items, vec![Item::new("Soap", "Cleaning", "pisey")]);
    }

    #[tokio::test]
    async fn test_import_counts_row_of_empty_cells_as_skipped() {
        let store = db::open_in_memory().unwrap();
        let text = "Item_name,category,default_supplier\n,,\nSoap,Cleaning,pisey\n";
        let summary = import_csv(&store, KeyMatching::Exact, text, |_| {})
            .await
            .unwrap();

        assert_eq!(summary.successful, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.list_items(ListOrder::OldestFirst).await.unwrap().len(), 1);
    }

    #[test]
    fn test_parse_items_tolerates_short_rows() {
        let text = "Item_name,category,default_supplier,brand_tag\nSoap,Cleaning\n";
        let items = parse_items(text).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].default_supplier, "");
        assert_eq!(items[0].brand_tag, None);
    }

    #[test]
    fn test_preview_is_capped() {
        let mut text = String::from("Item_name,category,default_supplier\n");
        for i in 0..25 {
            text.push_str(&format!("Item {i},Cat,Sup\n"));
        }
        assert_eq!(preview(&text).unwrap().len(), PREVIEW_ROWS);
    }

    #[tokio::test]
    async fn test_import_reports_skipped_row() {
        let store = db::open_in_memory().unwrap();
        let mut calls = 0;
        let summary = import_csv(&store, KeyMatching::Normalized, THREE_ROWS, |_| calls += 1)
            .await
            .unwrap();

        assert_eq!(summary.successful, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 0);
        assert_eq!(calls, 3);

        let stored = store.list_items(ListOrder::OldestFirst).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].item.measure_unit.as_deref(), Some("bottle"));
        assert_eq!(stored[1].item.measure_unit, None);
    }

    #[tokio::test]
    async fn test_import_of_header_only_file_is_an_error() {
        let store = db::open_in_memory().unwrap();
        let result = import_csv(
            &store,
            KeyMatching::Exact,
            "Item_name,category,default_supplier\n",
            |_| {},
        )
        .await;
        assert!(matches!(result, Err(ImportError::Empty)));
    }

    #[test]
    fn test_export_csv_uses_short_layout() {
        let mut soap = Item::new("Soap", "Cleaning", "pisey");
        soap.brand_tag = Some("Lux".into());
        let csv = export_csv(&[soap, Item::new("Box, large", "Packaging", "pp")]).unwrap();
        assert_eq!(
            csv,
            "Item_name,category,default_supplier\nSoap,Cleaning,pisey\n\"Box, large\",Packaging,pp\n"
        );
    }

    #[test]
    fn test_export_file_name() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(export_file_name(date), "inventory-2026-03-07.csv");
    }
}
