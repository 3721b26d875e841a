//! Supabase (PostgREST) item store.
//!
//! Talks to `{url}/rest/v1/{table}` with the service-role key. Filters are
//! passed as query parameters so reqwest handles the encoding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::item::{Item, KeyMatching, NaturalKey};
use crate::store::{ItemStore, KeyCandidate, ListOrder, OrderLine, StoreError, StoredItem};

/// Default timeout for REST requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Ids requested per page when listing existing rows. The server may cap a
/// page below this (`max-rows`), so paging stops only on an empty page.
const ID_PAGE: usize = 1000;

/// Maximum ids per `id=in.(...)` delete so the URL stays short.
const DELETE_CHUNK: usize = 100;

const ITEM_SELECT: &str = "id,item_name,category,default_supplier,supplier_alternative,order_quantity,measure_unit,default_quantity,brand_tag,created_at";

// ---------------------------------------------------------------------------
// URL normalisation & error mapping
// ---------------------------------------------------------------------------

/// Normalise the project URL: trim, ensure a scheme, strip trailing slashes
/// and a trailing `/rest/v1` segment.
pub fn normalize_project_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/rest/v1") {
        url.truncate(url.len() - "/rest/v1".len());
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Convert a `reqwest::Error` into a user-friendly message.
pub(crate) fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Supabase key is invalid or expired".to_string(),
        403 => "Supabase key lacks permission for this table".to_string(),
        404 => "Supabase table not found".to_string(),
        s if s >= 500 => format!("Supabase server error (HTTP {s})"),
        s => format!("Unexpected response from Supabase (HTTP {s})"),
    }
}

/// PostgREST `ilike` wildcards (`*`, plus the SQL `%` and `_`) are replaced
/// by `*` so the pattern can only widen the match, never narrow it.
fn ilike_pattern(raw: &str) -> String {
    let inner: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '%' | '_' | '*' | '\\' | ',' | '(' | ')' => '*',
            other => other,
        })
        .collect();
    format!("*{inner}*")
}

fn row_str(row: &Value, key: &str) -> Result<String, StoreError> {
    match row.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(StoreError::Decode(format!("row is missing `{key}`"))),
    }
}

fn item_payload(item: &Item) -> Value {
    serde_json::json!({
        "item_name": item.name,
        "category": item.category,
        "default_supplier": item.default_supplier,
        "supplier_alternative": item.supplier_alternative,
        "order_quantity": item.order_quantity,
        "measure_unit": item.measure_unit,
        "default_quantity": item.default_quantity,
        "brand_tag": item.brand_tag,
    })
}

/// Fields written when an existing row is updated; the key columns stay.
fn update_payload(item: &Item) -> Value {
    serde_json::json!({
        "category": item.category,
        "supplier_alternative": item.supplier_alternative,
        "order_quantity": item.order_quantity,
        "measure_unit": item.measure_unit,
        "default_quantity": item.default_quantity,
        "brand_tag": item.brand_tag,
    })
}

fn order_line_from_row(row: &Value) -> Result<OrderLine, StoreError> {
    let created_raw = row_str(row, "created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("bad created_at `{created_raw}`: {e}")))?;
    let quantity = match row.get("quantity") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| StoreError::Decode("row is missing `quantity`".into()))?;

    Ok(OrderLine {
        order_id: row_str(row, "order_id")?,
        user_id: row_str(row, "telegram_user_id")?,
        item_name: row_str(row, "item_name")?,
        quantity,
        category: row.get("category").and_then(Value::as_str).map(String::from),
        created_at,
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct SupabaseStore {
    client: Client,
    base_url: String,
    api_key: Zeroizing<String>,
}

impl SupabaseStore {
    pub fn new(project_url: &str, api_key: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: normalize_project_url(project_url),
            api_key: Zeroizing::new(api_key.trim().to_string()),
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let key: &str = &self.api_key;
        self.client
            .request(method, format!("{}/rest/v1/{table}", self.base_url))
            .header("apikey", key)
            .header("Authorization", format!("Bearer {key}"))
            .header("Content-Type", "application/json")
    }

    /// Send a request and return the JSON body (`Null` for empty bodies).
    async fn send(&self, req: RequestBuilder) -> Result<Value, StoreError> {
        let resp = req
            .send()
            .await
            .map_err(|e| StoreError::Network(friendly_error(&self.base_url, &e)))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            // PostgREST errors carry `message` (and sometimes `details`).
            let message = serde_json::from_str::<Value>(&body_text)
                .ok()
                .and_then(|json| {
                    json.get("message")
                        .or_else(|| json.get("error"))
                        .and_then(Value::as_str)
                        .map(String::from)
                })
                .unwrap_or_else(|| status_error(status));
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }

        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| StoreError::Decode(format!("Invalid JSON from Supabase: {e}")))
    }

    async fn fetch_rows(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<Value>, StoreError> {
        let body = self.send(self.request(Method::GET, table).query(query)).await?;
        match body {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Err(StoreError::Decode(format!(
                "expected an array of rows, got {other}"
            ))),
        }
    }

    async fn insert_rows(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, StoreError> {
        let body = self
            .send(
                self.request(Method::POST, table)
                    .header("Prefer", "return=representation")
                    .json(&Value::Array(rows)),
            )
            .await?;
        Ok(body.as_array().cloned().unwrap_or_default())
    }

    /// Every item id, fetched page by page with a stable order.
    async fn all_item_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        loop {
            let page = self
                .fetch_rows(
                    "items",
                    &[
                        ("select", "id".to_string()),
                        ("order", "id.asc".to_string()),
                        ("offset", ids.len().to_string()),
                        ("limit", ID_PAGE.to_string()),
                    ],
                )
                .await?;
            if page.is_empty() {
                return Ok(ids);
            }
            for row in &page {
                ids.push(row_str(row, "id")?);
            }
        }
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        for chunk in ids.chunks(DELETE_CHUNK) {
            let filter = format!("in.({})", chunk.join(","));
            self.send(self.request(Method::DELETE, "items").query(&[("id", filter)]))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ItemStore for SupabaseStore {
    fn name(&self) -> &'static str {
        "Supabase"
    }

    async fn list_items(&self, order: ListOrder) -> Result<Vec<StoredItem>, StoreError> {
        let order_param = match order {
            ListOrder::OldestFirst => "created_at.asc",
            ListOrder::NewestFirst => "created_at.desc",
        };
        let rows = self
            .fetch_rows(
                "items",
                &[
                    ("select", ITEM_SELECT.to_string()),
                    ("order", order_param.to_string()),
                ],
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(StoredItem {
                    id: row_str(row, "id")?,
                    item: Item::from_db_row(row),
                    created_at: row
                        .get("created_at")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect()
    }

    async fn find_key_candidates(
        &self,
        key: &NaturalKey,
    ) -> Result<Vec<KeyCandidate>, StoreError> {
        let (name_filter, supplier_filter) = match key.matching {
            KeyMatching::Exact => (format!("eq.{}", key.name), format!("eq.{}", key.supplier)),
            KeyMatching::Normalized => (
                format!("ilike.{}", ilike_pattern(&key.name)),
                format!("ilike.{}", ilike_pattern(&key.supplier)),
            ),
        };
        let rows = self
            .fetch_rows(
                "items",
                &[
                    ("select", "id,item_name,default_supplier".to_string()),
                    ("item_name", name_filter),
                    ("default_supplier", supplier_filter),
                    ("order", "created_at.asc".to_string()),
                ],
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(KeyCandidate {
                    id: row_str(row, "id")?,
                    name: row_str(row, "item_name")?,
                    supplier: row_str(row, "default_supplier")?,
                })
            })
            .collect()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Item>, StoreError> {
        let rows = self
            .fetch_rows(
                "items",
                &[
                    ("select", ITEM_SELECT.to_string()),
                    ("item_name", format!("eq.{name}")),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.first().map(Item::from_db_row))
    }

    async fn insert_item(&self, item: &Item) -> Result<String, StoreError> {
        let inserted = self.insert_rows("items", vec![item_payload(item)]).await?;
        let row = inserted
            .first()
            .ok_or_else(|| StoreError::Decode("insert returned no row".into()))?;
        row_str(row, "id")
    }

    async fn update_item(&self, id: &str, item: &Item) -> Result<(), StoreError> {
        self.send(
            self.request(Method::PATCH, "items")
                .query(&[("id", format!("eq.{id}"))])
                .json(&update_payload(item)),
        )
        .await?;
        Ok(())
    }

    /// PostgREST has no multi-statement transactions, so the new rows are
    /// written first and the previous rows are deleted by id only once the
    /// insert succeeded.
    async fn replace_all(&self, items: &[Item]) -> Result<usize, StoreError> {
        let previous = self.all_item_ids().await?;

        let inserted = if items.is_empty() {
            0
        } else {
            let rows = items.iter().map(item_payload).collect();
            self.insert_rows("items", rows).await?;
            items.len()
        };
        debug!(inserted, previous = previous.len(), "staged replacement rows");

        if let Err(e) = self.delete_ids(&previous).await {
            warn!(error = %e, "replacement rows inserted but old rows could not be removed");
            return Err(e);
        }

        info!(inserted, removed = previous.len(), "Supabase items replaced");
        Ok(inserted)
    }

    async fn insert_order_lines(&self, lines: &[OrderLine]) -> Result<(), StoreError> {
        let rows = lines
            .iter()
            .map(|line| {
                serde_json::json!({
                    "order_id": line.order_id,
                    "telegram_user_id": line.user_id,
                    "item_name": line.item_name,
                    "quantity": line.quantity,
                    "category": line.category,
                    "created_at": line.created_at.to_rfc3339(),
                })
            })
            .collect();
        self.insert_rows("orders", rows).await?;
        Ok(())
    }

    async fn list_order_lines(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<OrderLine>, StoreError> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(user) = user_id {
            query.push(("telegram_user_id", format!("eq.{user}")));
        }
        let rows = self.fetch_rows("orders", &query).await?;
        rows.iter().map(order_line_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_normalize_project_url() {
        assert_eq!(
            normalize_project_url("abc.supabase.co/"),
            "https://abc.supabase.co"
        );
        assert_eq!(
            normalize_project_url(" https://abc.supabase.co/rest/v1/ "),
            "https://abc.supabase.co"
        );
        assert_eq!(
            normalize_project_url("localhost:54321"),
            "http://localhost:54321"
        );
    }

    #[test]
    fn test_ilike_pattern_only_widens() {
        assert_eq!(ilike_pattern("soap"), "*soap*");
        assert_eq!(ilike_pattern(" 50% off_x "), "*50* off*x*");
    }

    #[tokio::test]
    async fn test_list_items_sends_auth_headers_and_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .and(header("apikey", "service-key"))
            .and(header("Authorization", "Bearer service-key"))
            .and(query_param("order", "created_at.desc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "id": "id-1",
                    "item_name": "Soap",
                    "category": "Cleaning",
                    "default_supplier": "pisey",
                    "supplier_alternative": null,
                    "created_at": "2026-01-02T10:00:00+00:00"
                }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let store = SupabaseStore::new(&server.uri(), "service-key").unwrap();
        let items = store.list_items(ListOrder::NewestFirst).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "id-1");
        assert_eq!(items[0].item, Item::new("Soap", "Cleaning", "pisey"));
    }

    #[tokio::test]
    async fn test_exact_candidates_use_eq_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .and(query_param("item_name", "eq.Soap"))
            .and(query_param("default_supplier", "eq.pisey"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": "id-1", "item_name": "Soap", "default_supplier": "pisey" }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let store = SupabaseStore::new(&server.uri(), "k").unwrap();
        let key = NaturalKey::new("Soap", "pisey", KeyMatching::Exact);
        let found = store.find_key_candidates(&key).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "id-1");
    }

    #[tokio::test]
    async fn test_http_error_surfaces_postgrest_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({ "message": "column does not exist" })),
            )
            .mount(&server)
            .await;

        let store = SupabaseStore::new(&server.uri(), "k").unwrap();
        let key = NaturalKey::new("Soap", "pisey", KeyMatching::Exact);
        match store.find_key_candidates(&key).await {
            Err(StoreError::Status { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "column does not exist");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_insert_item_returns_new_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/items"))
            .and(header("Prefer", "return=representation"))
            .and(body_json(serde_json::json!([{
                "item_name": "Soap",
                "category": "Cleaning",
                "default_supplier": "pisey",
                "supplier_alternative": null,
                "order_quantity": null,
                "measure_unit": null,
                "default_quantity": null,
                "brand_tag": null
            }])))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!([{ "id": "new-id" }])),
            )
            .mount(&server)
            .await;

        let store = SupabaseStore::new(&server.uri(), "k").unwrap();
        let id = store
            .insert_item(&Item::new("Soap", "Cleaning", "pisey"))
            .await
            .unwrap();
        assert_eq!(id, "new-id");
    }

    /// Serve `pages` of item ids at consecutive offsets, then an empty page.
    async fn mount_id_pages(server: &MockServer, pages: &[&[&str]]) {
        let mut offset = 0;
        for page in pages {
            let body: Vec<Value> = page.iter().map(|id| serde_json::json!({ "id": id })).collect();
            Mock::given(method("GET"))
                .and(path("/rest/v1/items"))
                .and(query_param("select", "id"))
                .and(query_param("offset", offset.to_string()))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .expect(1)
                .mount(server)
                .await;
            offset += page.len();
        }
        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .and(query_param("select", "id"))
            .and(query_param("offset", offset.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_replace_all_removes_rows_beyond_the_first_page() {
        let server = MockServer::start().await;
        // The server caps each listing below the requested page size.
        mount_id_pages(&server, &[&["old-1", "old-2"], &["old-3"]]).await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/items"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!([
                { "id": "new-1" }
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/items"))
            .and(query_param("id", "in.(old-1,old-2,old-3)"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = SupabaseStore::new(&server.uri(), "k").unwrap();
        let count = store
            .replace_all(&[Item::new("Soap", "Cleaning", "pisey")])
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_update_item_leaves_key_columns_alone() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/items"))
            .and(query_param("id", "eq.row-1"))
            .and(body_json(serde_json::json!({
                "category": "Hygiene",
                "supplier_alternative": null,
                "order_quantity": null,
                "measure_unit": "bottle",
                "default_quantity": null,
                "brand_tag": null
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = SupabaseStore::new(&server.uri(), "k").unwrap();
        let mut item = Item::new(" soap ", "Hygiene", "PISEY");
        item.measure_unit = Some("bottle".into());
        store.update_item("row-1", &item).await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_all_deletes_old_rows_after_insert() {
        let server = MockServer::start().await;
        mount_id_pages(&server, &[&["old-1", "old-2"]]).await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/items"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!([
                { "id": "new-1" }
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/items"))
            .and(query_param("id", "in.(old-1,old-2)"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = SupabaseStore::new(&server.uri(), "k").unwrap();
        let count = store
            .replace_all(&[Item::new("Soap", "Cleaning", "pisey")])
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_replace_all_keeps_old_rows_when_insert_fails() {
        let server = MockServer::start().await;
        mount_id_pages(&server, &[&["old-1"]]).await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/items"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/items"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let store = SupabaseStore::new(&server.uri(), "k").unwrap();
        let result = store
            .replace_all(&[Item::new("Soap", "Cleaning", "pisey")])
            .await;
        assert!(matches!(result, Err(StoreError::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_list_order_lines_maps_telegram_user_column() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/orders"))
            .and(query_param("telegram_user_id", "eq.42"))
            .and(query_param("limit", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "order_id": "order_1",
                "telegram_user_id": "42",
                "item_name": "Soap",
                "quantity": 3,
                "category": null,
                "created_at": "2026-03-01T08:30:00.123+00:00"
            }])))
            .mount(&server)
            .await;

        let store = SupabaseStore::new(&server.uri(), "k").unwrap();
        let lines = store.list_order_lines(Some("42"), 20).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].user_id, "42");
        assert_eq!(lines[0].quantity, 3.0);
        assert_eq!(lines[0].category, None);
    }
}
