use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CreateOrderRequest, Order};
use crate::services::Settled;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Response, AppError> {
    // Detached so a client disconnect cannot interrupt the commit or its rollback.
    let orders = state.orders.clone();
    let placed = tokio::spawn(async move { orders.create_order(request).await })
        .await
        .map_err(|e| AppError::InternalServerError(format!("checkout task failed: {e}")))??;

    Ok(created(placed, "Order created"))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let placed = state
        .orders
        .find_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))?;
    Ok(success(placed, "Order found"))
}

#[derive(Debug, Deserialize)]
pub struct PayOrderRequest {
    pub payment_method: String,
}

#[derive(Serialize)]
struct PaymentOutcome {
    authorized: bool,
    order: Order,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

pub async fn pay_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<PayOrderRequest>,
) -> Result<Response, AppError> {
    let method = request.payment_method.trim();
    if method.is_empty() {
        return Err(AppError::ValidationError(
            "payment_method must not be empty".to_string(),
        ));
    }

    let outcome = match state.settlement.pay(order_id, method).await? {
        Settled::Paid(order) => PaymentOutcome {
            authorized: true,
            order,
            reason: None,
        },
        Settled::Declined { order, reason } => PaymentOutcome {
            authorized: false,
            order,
            reason: Some(reason),
        },
    };
    let message = if outcome.authorized {
        "Payment authorized"
    } else {
        "Payment declined"
    };
    Ok(success(outcome, message))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let order = state.settlement.cancel(order_id).await?;
    Ok(success(order, "Order cancelled"))
}

pub async fn refund_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let order = state.settlement.refund(order_id).await?;
    Ok(success(order, "Order refunded"))
}
