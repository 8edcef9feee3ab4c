#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use boxoffice_server::config::CheckoutSettings;
use boxoffice_server::models::TicketType;
use boxoffice_server::routes::api_routes;
use boxoffice_server::services::{MockPaymentGateway, PaymentGateway};
use boxoffice_server::state::AppState;
use boxoffice_server::store::{MemoryStore, TicketStore};

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_gateway(Arc::new(MockPaymentGateway::approving()))
    }

    pub fn with_gateway(gateway: Arc<dyn PaymentGateway>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), gateway, &CheckoutSettings::default());
        let router = api_routes(state.clone());
        Self {
            store,
            state,
            router,
        }
    }

    pub async fn ticket_type(&self, price_cents: i64, total: i32) -> TicketType {
        let ticket_type = TicketType::new(
            Uuid::new_v4(),
            "General Admission",
            Decimal::new(price_cents, 2),
            total,
        );
        self.store.insert_ticket_type(&ticket_type).await.unwrap();
        ticket_type
    }

    pub async fn sold(&self, ticket_type_id: Uuid) -> i32 {
        self.store
            .ticket_type(ticket_type_id)
            .await
            .unwrap()
            .unwrap()
            .quantity_sold
    }

    pub async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}
