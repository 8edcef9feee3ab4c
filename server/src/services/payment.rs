//! Payment gateway boundary. Gateway internals are out of scope; the core only
//! needs an authorized/declined answer.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentDecision {
    Authorized { reference: String },
    Declined { reason: String },
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(
        &self,
        order_id: Uuid,
        amount: Decimal,
        method: &str,
    ) -> Result<PaymentDecision, GatewayError>;
}

/// Development gateway with a fixed answer.
#[derive(Debug, Clone, Default)]
pub struct MockPaymentGateway {
    decline_reason: Option<String>,
}

impl MockPaymentGateway {
    pub fn approving() -> Self {
        Self::default()
    }

    pub fn declining(reason: impl Into<String>) -> Self {
        Self {
            decline_reason: Some(reason.into()),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn authorize(
        &self,
        order_id: Uuid,
        amount: Decimal,
        method: &str,
    ) -> Result<PaymentDecision, GatewayError> {
        let decision = match &self.decline_reason {
            Some(reason) => PaymentDecision::Declined {
                reason: reason.clone(),
            },
            None => PaymentDecision::Authorized {
                reference: format!("mock_txn_{}", Uuid::new_v4()),
            },
        };
        tracing::info!(%order_id, %amount, method, ?decision, "Mock payment decision");
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_gateway_answers() {
        let approved = MockPaymentGateway::approving()
            .authorize(Uuid::new_v4(), Decimal::TEN, "card")
            .await
            .unwrap();
        assert!(matches!(approved, PaymentDecision::Authorized { reference } if reference.starts_with("mock_txn_")));

        let declined = MockPaymentGateway::declining("insufficient funds")
            .authorize(Uuid::new_v4(), Decimal::TEN, "card")
            .await
            .unwrap();
        assert_eq!(
            declined,
            PaymentDecision::Declined {
                reason: "insufficient funds".to_string()
            }
        );
    }
}
