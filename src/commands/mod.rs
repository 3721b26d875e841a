//! HTTP surface.
//!
//! Every handler receives the shared [`AppState`] built once at start-up;
//! there are no global clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::DbState;
use crate::item::KeyMatching;
use crate::sheets::SheetsApi;
use crate::source::CsvSource;
use crate::store::ItemStore;

pub mod items;
pub mod orders;
pub mod sync;

/// Clients and settings shared by all handlers.
pub struct AppState {
    pub store: Arc<dyn ItemStore>,
    /// `None` when no service account is configured.
    pub sheets: Option<Arc<dyn SheetsApi>>,
    pub csv: Arc<dyn CsvSource>,
    pub key_matching: KeyMatching,
    /// Set when the local database is the primary store.
    pub db: Option<Arc<DbState>>,
}

pub type SharedState = Arc<AppState>;

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// `{ "error": "..." }` with a status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), error = %self.message, "request failed");
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

async fn health(
    axum::extract::State(state): axum::extract::State<SharedState>,
) -> Json<serde_json::Value> {
    let database = state
        .db
        .as_ref()
        .and_then(|db| crate::diagnostics::get_db_status(db).ok());
    Json(serde_json::json!({
        "status": "healthy",
        "about": crate::diagnostics::get_about_info(),
        "store": state.store.name(),
        "sheetsConfigured": state.sheets.is_some(),
        "keyMatching": state.key_matching,
        "database": database,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sync", get(sync::trigger_sync).post(sync::trigger_sync))
        .route("/items", get(items::list_items))
        .route("/items/lookup", get(items::lookup_item))
        .route("/items/preview", post(items::preview_import))
        .route("/items/import", post(items::import_items))
        .route("/items/export", get(items::export_items))
        .route("/orders", get(orders::list_orders).post(orders::place_order))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
