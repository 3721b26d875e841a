use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::{ApiError, ApiResult, SharedState};
use crate::orders::{self, Order, OrderError, OrderLineRequest, DEFAULT_HISTORY_LIMIT};

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        if err.is_client_error() {
            ApiError::bad_request(err.to_string())
        } else {
            ApiError::internal(err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderPayload {
    #[serde(default, alias = "user_id", alias = "telegram_user_id")]
    user_id: String,
    #[serde(default, alias = "items")]
    lines: Vec<OrderLineRequest>,
}

/// `POST /orders`
pub async fn place_order(
    State(state): State<SharedState>,
    Json(payload): Json<PlaceOrderPayload>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    let order = orders::place_order(state.store.as_ref(), &payload.user_id, &payload.lines).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    #[serde(default, alias = "userId")]
    user_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

/// `GET /orders[?user_id=...&limit=...]`
pub async fn list_orders(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Order>>> {
    let user_id = query.user_id.as_deref().filter(|u| !u.trim().is_empty());
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let history = orders::list_orders(state.store.as_ref(), user_id, limit).await?;
    Ok(Json(history))
}
