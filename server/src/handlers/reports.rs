use axum::extract::{Query, State};
use axum::response::Response;

use crate::models::ReportQuery;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

fn validate_range(query: &ReportQuery) -> Result<(), AppError> {
    match (query.from, query.to) {
        (Some(from), Some(to)) if from > to => Err(AppError::ValidationError(
            "'from' must not be after 'to'".to_string(),
        )),
        _ => Ok(()),
    }
}

pub async fn orders_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, AppError> {
    validate_range(&query)?;
    let orders = state.store.orders_in_range(&query).await?;
    Ok(success(orders, "Orders report"))
}

pub async fn tickets_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, AppError> {
    validate_range(&query)?;
    let tickets = state.store.tickets_in_range(&query).await?;
    Ok(success(tickets, "Tickets report"))
}
