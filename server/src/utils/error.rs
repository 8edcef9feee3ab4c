use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};

use crate::services::{OrderError, Rejection, SettlementError};
use crate::store::StoreError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A line item could not be reserved.
    #[error("Order rejected: {0}")]
    Rejected(Rejection),

    /// The record's current status forbids the requested transition.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error")]
    StorageError(#[from] StoreError),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Rejected(rejection) => match rejection {
                Rejection::NotFound { .. } => StatusCode::NOT_FOUND,
                Rejection::InsufficientInventory { .. } => StatusCode::CONFLICT,
                Rejection::Inactive { .. } | Rejection::InvalidQuantity { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
            },
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::StorageError(StoreError::Transient(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Rejected(rejection) => match rejection {
                Rejection::NotFound { .. } => "NOT_FOUND",
                Rejection::Inactive { .. } => "INACTIVE",
                Rejection::InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
                Rejection::InvalidQuantity { .. } => "INVALID_QUANTITY",
            },
            AppError::Conflict(_) => "CONFLICT",
            AppError::StorageError(_) => "STORAGE_ERROR",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            AppError::Rejected(rejection) => Some(json!({
                "ticket_type_id": rejection.ticket_type_id(),
            })),
            _ => None,
        }
    }

    fn log(&self) {
        match self {
            // Expected outcomes of checkout, not faults.
            AppError::Rejected(rejection) => {
                info!(code = self.code(), %rejection, "Order rejected");
            }
            AppError::ValidationError(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::ExternalServiceError(msg)
            | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::StorageError(e) => {
                error!(error = ?e, "Storage error");
            }
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::EmptyOrder => AppError::ValidationError(err.to_string()),
            OrderError::Rejected(rejection) => AppError::Rejected(rejection),
            OrderError::CredentialsExhausted { .. } => AppError::InternalServerError(err.to_string()),
            OrderError::HoldsExpired => AppError::Conflict(err.to_string()),
            OrderError::Storage(e) => AppError::StorageError(e),
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::NotFound(_) => AppError::NotFound(err.to_string()),
            SettlementError::InvalidTransition { .. } => AppError::Conflict(err.to_string()),
            SettlementError::Gateway(e) => AppError::ExternalServiceError(e.to_string()),
            SettlementError::Storage(e) => AppError::StorageError(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = match &self {
            AppError::ValidationError(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::ExternalServiceError(msg) => msg.clone(),
            AppError::Rejected(rejection) => rejection.to_string(),
            AppError::StorageError(StoreError::Transient(_)) => {
                "The service is temporarily unavailable, please retry".to_string()
            }
            AppError::StorageError(_) => "A storage error occurred".to_string(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
        };

        error_response(code, public_message, self.details(), status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_rejections_map_to_distinct_codes() {
        let ticket_type_id = Uuid::new_v4();
        let cases = [
            (Rejection::NotFound { ticket_type_id }, StatusCode::NOT_FOUND, "NOT_FOUND"),
            (Rejection::Inactive { ticket_type_id }, StatusCode::UNPROCESSABLE_ENTITY, "INACTIVE"),
            (
                Rejection::InsufficientInventory { ticket_type_id },
                StatusCode::CONFLICT,
                "INSUFFICIENT_INVENTORY",
            ),
            (
                Rejection::InvalidQuantity {
                    ticket_type_id,
                    quantity: 0,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_QUANTITY",
            ),
        ];
        for (rejection, status, code) in cases {
            let err = AppError::Rejected(rejection);
            assert_eq!(err.status_code(), status);
            assert_eq!(err.code(), code);
            assert_eq!(err.details(), Some(json!({ "ticket_type_id": ticket_type_id })));
        }
    }

    #[test]
    fn test_reclaimed_holds_are_a_conflict() {
        let err = AppError::from(OrderError::HoldsExpired);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_transient_storage_is_service_unavailable() {
        let err = AppError::from(StoreError::Transient("pool timed out".to_string()));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
