use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer, Config};
use crate::handlers::{admin, checkin, health_check, orders, reports, ticket_types};
use crate::state::AppState;

/// Business routes without the outer middleware.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ticket-types", post(ticket_types::create_ticket_type))
        .route(
            "/ticket-types/:id",
            get(ticket_types::get_ticket_type).patch(ticket_types::update_ticket_type),
        )
        .route("/orders", post(orders::create_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/pay", post(orders::pay_order))
        .route("/orders/:id/cancel", post(orders::cancel_order))
        .route("/orders/:id/refund", post(orders::refund_order))
        .route("/check-in", post(checkin::check_in))
        .route("/tickets/:id/cancel", post(checkin::cancel_ticket))
        .route("/reports/orders", get(reports::orders_report))
        .route("/reports/tickets", get(reports::tickets_report))
        .route("/admin/reconcile", post(admin::reconcile))
        .with_state(state)
}

pub fn create_routes(state: AppState, config: &Config) -> Router {
    api_routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer(config.production))
        .layer(create_cors_layer(config.cors_allowed_origins.as_deref()))
}
