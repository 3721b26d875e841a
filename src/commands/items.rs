use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, ApiResult, SharedState};
use crate::csv_import::{self, ImportError};
use crate::source::{self, ItemListing, SourceError};

impl From<SourceError> for ApiError {
    fn from(err: SourceError) -> Self {
        let status = match err {
            SourceError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SourceError::Csv(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Write(_) => ApiError::internal(err.to_string()),
            _ => ApiError::bad_request(err.to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    #[serde(default)]
    fallback: Option<bool>,
}

/// `GET /items[?fallback=true]`
pub async fn list_items(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ItemListing>> {
    let listing = source::load_items(
        state.store.as_ref(),
        state.csv.as_ref(),
        query.fallback.unwrap_or(false),
    )
    .await?;
    Ok(Json(listing))
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    name: String,
}

/// `GET /items/lookup?name=...`
pub async fn lookup_item(
    State(state): State<SharedState>,
    Query(query): Query<LookupQuery>,
) -> ApiResult<Json<Value>> {
    let name = query.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Item name is required"));
    }
    match source::lookup_item(state.store.as_ref(), state.csv.as_ref(), name).await? {
        Some(item) => Ok(Json(json!({ "item": item }))),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, "Item not found")),
    }
}

/// `POST /items/preview` with CSV text as the body.
pub async fn preview_import(body: String) -> ApiResult<Json<Value>> {
    let items = csv_import::preview(&body)?;
    Ok(Json(json!({ "items": items })))
}

/// `POST /items/import` with CSV text as the body.
pub async fn import_items(
    State(state): State<SharedState>,
    body: String,
) -> ApiResult<Json<Value>> {
    let summary = csv_import::import_csv(
        state.store.as_ref(),
        state.key_matching,
        &body,
        |progress| {
            tracing::debug!(
                processed = progress.processed,
                total = progress.total,
                "import progress"
            )
        },
    )
    .await?;
    Ok(Json(json!({
        "summary": summary,
        "message": summary.message(),
    })))
}

/// `GET /items/export` as a CSV download.
pub async fn export_items(State(state): State<SharedState>) -> ApiResult<impl IntoResponse> {
    let listing = source::load_items(state.store.as_ref(), state.csv.as_ref(), false).await?;
    let body = csv_import::export_csv(&listing.items)?;
    let file_name = csv_import::export_file_name(chrono::Local::now().date_naive());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        body,
    ))
}
