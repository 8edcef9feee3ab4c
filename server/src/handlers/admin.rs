use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileParams {
    pub ticket_type_id: Option<Uuid>,
}

pub async fn reconcile(
    State(state): State<AppState>,
    Query(params): Query<ReconcileParams>,
) -> Result<Response, AppError> {
    let report = match params.ticket_type_id {
        Some(id) => state.reconciler.reconcile_ticket_type(id).await?,
        None => state.reconciler.reconcile_all().await?,
    };
    Ok(success(report, "Reconciliation complete"))
}
