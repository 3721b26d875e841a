//! Order placement and history.
//!
//! An order is the set of persisted lines sharing one `order_id`. Lines are
//! written once and never updated.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::store::{ItemStore, OrderLine, StoreError};

/// Default number of lines fetched for an order history.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("User id is required")]
    MissingUser,
    #[error("Order has no lines")]
    Empty,
    #[error("Line {line}: {reason}")]
    InvalidLine { line: usize, reason: &'static str },
    #[error("Failed to save order: {0}")]
    Store(#[from] StoreError),
}

impl OrderError {
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}

/// One requested line before it is persisted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    #[serde(alias = "item_name")]
    pub item_name: String,
    pub quantity: f64,
    #[serde(default)]
    pub category: Option<String>,
}

/// Lines grouped under one order id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub user_id: String,
    pub created_at: chrono::DateTime<Utc>,
    pub lines: Vec<OrderLine>,
    pub total_quantity: f64,
}

impl Order {
    fn from_lines(lines: Vec<OrderLine>) -> Option<Self> {
        let first = lines.first()?;
        Some(Self {
            order_id: first.order_id.clone(),
            user_id: first.user_id.clone(),
            created_at: first.created_at,
            total_quantity: lines.iter().map(|l| l.quantity).sum(),
            lines,
        })
    }
}

fn new_order_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("order_{}_{}", Utc::now().timestamp_millis(), &suffix[..8])
}

fn validate(lines: &[OrderLineRequest]) -> Result<(), OrderError> {
    if lines.is_empty() {
        return Err(OrderError::Empty);
    }
    for (idx, line) in lines.iter().enumerate() {
        if line.item_name.trim().is_empty() {
            return Err(OrderError::InvalidLine {
                line: idx + 1,
                reason: "item name is empty",
            });
        }
        if !line.quantity.is_finite() || line.quantity <= 0.0 {
            return Err(OrderError::InvalidLine {
                line: idx + 1,
                reason: "quantity must be greater than zero",
            });
        }
    }
    Ok(())
}

/// Validate and persist `lines` as one order with a fresh id.
pub async fn place_order(
    store: &dyn ItemStore,
    user_id: &str,
    lines: &[OrderLineRequest],
) -> Result<Order, OrderError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(OrderError::MissingUser);
    }
    validate(lines)?;

    let order_id = new_order_id();
    let created_at = Utc::now();
    let persisted: Vec<OrderLine> = lines
        .iter()
        .map(|line| OrderLine {
            order_id: order_id.clone(),
            user_id: user_id.to_string(),
            item_name: line.item_name.trim().to_string(),
            quantity: line.quantity,
            category: line.category.clone().filter(|c| !c.trim().is_empty()),
            created_at,
        })
        .collect();

    store.insert_order_lines(&persisted).await?;
    info!(order_id = %order_id, user_id, lines = persisted.len(), "order placed");

    Order::from_lines(persisted).ok_or(OrderError::Empty)
}

/// Recent orders, newest first. `limit` caps the number of lines read.
pub async fn list_orders(
    store: &dyn ItemStore,
    user_id: Option<&str>,
    limit: usize,
) -> Result<Vec<Order>, OrderError> {
    let lines = store.list_order_lines(user_id, limit).await?;

    let mut groups: Vec<Vec<OrderLine>> = Vec::new();
    for line in lines {
        match groups
            .iter_mut()
            .find(|g| g.first().is_some_and(|l| l.order_id == line.order_id))
        {
            Some(group) => group.push(line),
            None => groups.push(vec![line]),
        }
    }

    Ok(groups.into_iter().filter_map(Order::from_lines).collect())
}
