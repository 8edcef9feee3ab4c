//! Order status changes after checkout: payment, cancellation, refund.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use super::payment::{GatewayError, PaymentDecision, PaymentGateway};
use super::RetryPolicy;
use crate::models::{Order, OrderStatus, PaymentDetails};
use crate::store::{StoreError, TicketStore, Transition};

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("order {0} not found")]
    NotFound(Uuid),

    #[error("order cannot move from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub enum Settled {
    Paid(Order),
    /// The gateway declined and the order was cancelled.
    Declined { order: Order, reason: String },
}

pub struct OrderSettlement {
    store: Arc<dyn TicketStore>,
    gateway: Arc<dyn PaymentGateway>,
    retry: RetryPolicy,
}

impl OrderSettlement {
    pub fn new(
        store: Arc<dyn TicketStore>,
        gateway: Arc<dyn PaymentGateway>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            retry,
        }
    }

    pub async fn pay(&self, order_id: Uuid, method: &str) -> Result<Settled, SettlementError> {
        let order = self
            .retry
            .run("order.get", || self.store.order(order_id))
            .await?
            .ok_or(SettlementError::NotFound(order_id))?;
        if !order.status.can_transition_to(OrderStatus::Paid) {
            return Err(SettlementError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Paid,
            });
        }

        match self
            .gateway
            .authorize(order.id, order.total_amount, method)
            .await?
        {
            PaymentDecision::Authorized { reference } => {
                let payment = PaymentDetails {
                    method: method.to_string(),
                    reference,
                };
                let paid = self.transition(order_id, OrderStatus::Paid, Some(&payment)).await?;
                tracing::info!(%order_id, reference = %payment.reference, "Order paid");
                Ok(Settled::Paid(paid))
            }
            PaymentDecision::Declined { reason } => {
                let cancelled = self.transition(order_id, OrderStatus::Cancelled, None).await?;
                tracing::info!(%order_id, %reason, "Payment declined, order cancelled");
                Ok(Settled::Declined {
                    order: cancelled,
                    reason,
                })
            }
        }
    }

    pub async fn cancel(&self, order_id: Uuid) -> Result<Order, SettlementError> {
        let order = self.transition(order_id, OrderStatus::Cancelled, None).await?;
        tracing::info!(%order_id, "Order cancelled");
        Ok(order)
    }

    pub async fn refund(&self, order_id: Uuid) -> Result<Order, SettlementError> {
        let order = self.transition(order_id, OrderStatus::Refunded, None).await?;
        tracing::info!(%order_id, "Order refunded");
        Ok(order)
    }

    async fn transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        payment: Option<&PaymentDetails>,
    ) -> Result<Order, SettlementError> {
        let transition = self
            .retry
            .run("order.transition", || {
                self.store.transition_order(order_id, target, payment)
            })
            .await?;
        match transition {
            Transition::Applied(order) => Ok(order),
            Transition::Refused(current) => Err(SettlementError::InvalidTransition {
                from: current.status,
                to: target,
            }),
            Transition::NotFound => Err(SettlementError::NotFound(order_id)),
        }
    }
}
