use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{NewTicketType, TicketType, TicketTypeChanges};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

fn validate_price(price: Decimal) -> Result<(), AppError> {
    if price.is_sign_negative() {
        return Err(AppError::ValidationError("price must not be negative".to_string()));
    }
    Ok(())
}

pub async fn create_ticket_type(
    State(state): State<AppState>,
    Json(request): Json<NewTicketType>,
) -> Result<Response, AppError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::ValidationError("name must not be empty".to_string()));
    }
    if request.quantity_total < 0 {
        return Err(AppError::ValidationError(
            "quantity_total must not be negative".to_string(),
        ));
    }
    validate_price(request.price)?;

    let ticket_type = TicketType::new(request.event_id, name, request.price, request.quantity_total);
    state.store.insert_ticket_type(&ticket_type).await?;
    tracing::info!(
        ticket_type_id = %ticket_type.id,
        event_id = %ticket_type.event_id,
        quantity_total = ticket_type.quantity_total,
        "Ticket type created"
    );
    Ok(created(ticket_type, "Ticket type created"))
}

pub async fn get_ticket_type(
    State(state): State<AppState>,
    Path(ticket_type_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let ticket_type = state
        .store
        .ticket_type(ticket_type_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ticket type {ticket_type_id}")))?;
    Ok(success(ticket_type, "Ticket type found"))
}

pub async fn update_ticket_type(
    State(state): State<AppState>,
    Path(ticket_type_id): Path<Uuid>,
    Json(changes): Json<TicketTypeChanges>,
) -> Result<Response, AppError> {
    if let Some(price) = changes.price {
        validate_price(price)?;
    }
    let ticket_type = state
        .store
        .update_ticket_type(ticket_type_id, &changes)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ticket type {ticket_type_id}")))?;
    Ok(success(ticket_type, "Ticket type updated"))
}
