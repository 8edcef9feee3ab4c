use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{CheckInRequest, Ticket};
use crate::services::CheckInRefusal;
use crate::state::AppState;
use crate::store::Transition;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Serialize)]
struct CheckInResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<CheckInRefusal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ticket: Option<Ticket>,
}

/// Every scan gets a 200 with a verdict; only infrastructure failures are errors.
pub async fn check_in(
    State(state): State<AppState>,
    Json(request): Json<CheckInRequest>,
) -> Result<Response, AppError> {
    let result = state.check_in.check_in(&request.code).await?;
    let reason = result.refusal();
    let message = match reason {
        None => "Ticket admitted",
        Some(CheckInRefusal::AlreadyUsed) => "Ticket already used",
        Some(CheckInRefusal::Cancelled) => "Ticket cancelled",
        Some(CheckInRefusal::NotFound) => "Ticket not found",
    };
    let response = CheckInResponse {
        valid: reason.is_none(),
        reason,
        ticket: result.ticket().cloned(),
    };
    Ok(success(response, message))
}

pub async fn cancel_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Response, AppError> {
    match state.check_in.cancel_ticket(ticket_id).await? {
        Transition::Applied(ticket) => Ok(success(ticket, "Ticket cancelled")),
        Transition::Refused(ticket) => Err(AppError::Conflict(format!(
            "ticket {} is {} and cannot be cancelled",
            ticket.id,
            ticket.status.as_str()
        ))),
        Transition::NotFound => Err(AppError::NotFound(format!("ticket {ticket_id}"))),
    }
}
