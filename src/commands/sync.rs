use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::{ApiError, ApiResult, SharedState};
use crate::config::ConfigError;
use crate::sync::{SyncAction, SyncError, SyncOrchestrator, SyncReport};

#[derive(Debug, Deserialize, Default)]
pub struct SyncQuery {
    #[serde(default)]
    action: Option<String>,
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        ApiError::new(status, err.to_string())
    }
}

/// `GET|POST /sync?action=...`
pub async fn trigger_sync(
    State(state): State<SharedState>,
    Query(query): Query<SyncQuery>,
) -> ApiResult<Json<SyncReport>> {
    let action: SyncAction = query
        .action
        .as_deref()
        .unwrap_or_default()
        .parse()?;

    let sheets = state
        .sheets
        .as_deref()
        .ok_or_else(|| ApiError::internal(ConfigError::SheetsNotConfigured.to_string()))?;

    let report = SyncOrchestrator::new(state.store.as_ref(), sheets, state.key_matching)
        .run(action)
        .await?;
    Ok(Json(report))
}
