//! Canonical inventory item record.
//!
//! Rows arrive in three shapes: a CSV record keyed by header name, a
//! spreadsheet row addressed by column position, and a database row object.
//! Everything downstream (existence checks, upserts, sync) works on [`Item`]
//! only, so the mapping from each shape lives here. Nothing in this module
//! validates; see [`Item::is_valid`] for the rule consumers apply.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// CSV header names, in spreadsheet column order (A..H).
pub const CSV_COLUMNS: [&str; 8] = [
    "Item_name",
    "category",
    "default_supplier",
    "supplier_alternative",
    "order_quantity",
    "measure_unit",
    "default_quantity",
    "brand_tag",
];

/// Number of columns in the spreadsheet layout.
pub const SHEET_WIDTH: usize = CSV_COLUMNS.len();

/// One inventory item.
///
/// Serialises with the database column names (`item_name`, ...). The CSV
/// spelling `Item_name` is accepted on input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "item_name", alias = "Item_name", alias = "name")]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub default_supplier: String,
    #[serde(default)]
    pub supplier_alternative: Option<String>,
    #[serde(default)]
    pub order_quantity: Option<String>,
    #[serde(default)]
    pub measure_unit: Option<String>,
    #[serde(default)]
    pub default_quantity: Option<String>,
    #[serde(default)]
    pub brand_tag: Option<String>,
}

/// Blank optional cells collapse to `None` so every source agrees on "unset".
fn optional(raw: Option<&str>) -> Option<String> {
    raw.filter(|s| !s.is_empty()).map(ToString::to_string)
}

fn csv_field<'r>(
    headers: &csv::StringRecord,
    record: &'r csv::StringRecord,
    column: &str,
) -> Option<&'r str> {
    headers
        .iter()
        .position(|h| h == column)
        .and_then(|idx| record.get(idx))
}

fn json_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl Item {
    /// Build an item from required fields only.
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        default_supplier: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            default_supplier: default_supplier.into(),
            ..Self::default()
        }
    }

    /// Map a CSV record by header name. Header names are case-sensitive and
    /// unknown columns are ignored.
    pub fn from_csv_record(headers: &csv::StringRecord, record: &csv::StringRecord) -> Self {
        let field = |column: &'static str| csv_field(headers, record, column);

        Self {
            name: field("Item_name").unwrap_or_default().to_string(),
            category: field("category").unwrap_or_default().to_string(),
            default_supplier: field("default_supplier").unwrap_or_default().to_string(),
            supplier_alternative: optional(field("supplier_alternative")),
            order_quantity: optional(field("order_quantity")),
            measure_unit: optional(field("measure_unit")),
            default_quantity: optional(field("default_quantity")),
            brand_tag: optional(field("brand_tag")),
        }
    }

    /// Map a spreadsheet row positionally (A..H). Short rows are padded.
    pub fn from_sheet_row(row: &[String]) -> Self {
        let cell = |idx: usize| row.get(idx).map(String::as_str);

        Self {
            name: cell(0).unwrap_or_default().to_string(),
            category: cell(1).unwrap_or_default().to_string(),
            default_supplier: cell(2).unwrap_or_default().to_string(),
            supplier_alternative: optional(cell(3)),
            order_quantity: optional(cell(4)),
            measure_unit: optional(cell(5)),
            default_quantity: optional(cell(6)),
            brand_tag: optional(cell(7)),
        }
    }

    /// Map a database row object by column name. `null` and missing columns
    /// become empty / `None`; numeric quantities are rendered as text.
    pub fn from_db_row(row: &Value) -> Self {
        let text = |key: &str| json_text(row.get(key));

        Self {
            name: text("item_name").unwrap_or_default(),
            category: text("category").unwrap_or_default(),
            default_supplier: text("default_supplier").unwrap_or_default(),
            supplier_alternative: optional(text("supplier_alternative").as_deref()),
            order_quantity: optional(text("order_quantity").as_deref()),
            measure_unit: optional(text("measure_unit").as_deref()),
            default_quantity: optional(text("default_quantity").as_deref()),
            brand_tag: optional(text("brand_tag").as_deref()),
        }
    }

    /// Render into the fixed 8-column spreadsheet layout.
    pub fn to_sheet_row(&self) -> Vec<String> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        vec![
            self.name.clone(),
            self.category.clone(),
            self.default_supplier.clone(),
            opt(&self.supplier_alternative),
            opt(&self.order_quantity),
            opt(&self.measure_unit),
            opt(&self.default_quantity),
            opt(&self.brand_tag),
        ]
    }

    /// Required fields that are empty (or whitespace only).
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("Item_name");
        }
        if self.category.trim().is_empty() {
            missing.push("category");
        }
        if self.default_supplier.trim().is_empty() {
            missing.push("default_supplier");
        }
        missing
    }

    /// An item may be persisted only when name, category and supplier are set.
    pub fn is_valid(&self) -> bool {
        self.missing_fields().is_empty()
    }

    pub fn natural_key(&self, matching: KeyMatching) -> NaturalKey {
        NaturalKey::new(&self.name, &self.default_supplier, matching)
    }
}

// ---------------------------------------------------------------------------
// Natural key
// ---------------------------------------------------------------------------

/// How the (name, supplier) pair is compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMatching {
    /// Byte-for-byte comparison of both fields.
    Exact,
    /// Trim surrounding whitespace and lowercase both fields first.
    #[default]
    Normalized,
}

impl KeyMatching {
    /// Canonical form of one key component under this policy.
    pub fn key_part(self, raw: &str) -> String {
        match self {
            Self::Exact => raw.to_string(),
            Self::Normalized => raw.trim().to_lowercase(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Normalized => "normalized",
        }
    }
}

impl fmt::Display for KeyMatching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyMatching {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "normalized" | "normalised" => Ok(Self::Normalized),
            other => Err(format!("Unknown key matching mode: {other}")),
        }
    }
}

/// The (name, supplier) identity used to decide whether two records are the
/// same logical item. Components are stored already in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub name: String,
    pub supplier: String,
    pub matching: KeyMatching,
}

impl NaturalKey {
    pub fn new(name: &str, supplier: &str, matching: KeyMatching) -> Self {
        Self {
            name: matching.key_part(name),
            supplier: matching.key_part(supplier),
            matching,
        }
    }

    /// Whether a stored (name, supplier) pair refers to this key.
    pub fn matches(&self, name: &str, supplier: &str) -> bool {
        self.matching.key_part(name) == self.name && self.matching.key_part(supplier) == self.supplier
    }
}
