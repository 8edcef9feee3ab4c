//! Order aggregator: all-or-nothing checkout across several ticket types.
//!
//! Line items are reserved in the order supplied. The first rejection releases
//! every hold granted so far and fails the whole order. Once all items hold
//! inventory, the order and one ticket per unit are committed atomically; a
//! failed commit releases the holds before the error is returned.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::credentials::{CredentialIssuer, IssueError, Persisted};
use super::reservation::{Rejection, Reservation, ReservationEngine, ReserveError};
use super::{InventoryLedger, IssuanceNotifier, RetryPolicy};
use crate::models::{CreateOrderRequest, LineItemRequest, Order, OrderStatus, PlacedOrder};
use crate::store::{StoreError, TicketStore};

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("an order needs at least one line item")]
    EmptyOrder,

    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("could not mint unique credentials after {attempts} attempts")]
    CredentialsExhausted { attempts: u32 },

    #[error("checkout took too long and its inventory holds were reclaimed")]
    HoldsExpired,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<ReserveError> for OrderError {
    fn from(err: ReserveError) -> Self {
        match err {
            ReserveError::Rejected(rejection) => OrderError::Rejected(rejection),
            ReserveError::Storage(err) => OrderError::Storage(err),
        }
    }
}

impl From<IssueError> for OrderError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::Exhausted { attempts } => OrderError::CredentialsExhausted { attempts },
            IssueError::Storage(err) => OrderError::Storage(err),
        }
    }
}

pub struct OrderAggregator {
    store: Arc<dyn TicketStore>,
    ledger: Arc<InventoryLedger>,
    engine: ReservationEngine,
    issuer: CredentialIssuer,
    notifier: IssuanceNotifier,
    retry: RetryPolicy,
}

impl OrderAggregator {
    pub fn new(
        store: Arc<dyn TicketStore>,
        ledger: Arc<InventoryLedger>,
        engine: ReservationEngine,
        issuer: CredentialIssuer,
        notifier: IssuanceNotifier,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            engine,
            issuer,
            notifier,
            retry,
        }
    }

    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<PlacedOrder, OrderError> {
        self.validate(&request.line_items)?;

        if let Some(key) = request.idempotency_key {
            let existing = self
                .retry
                .run("order.by_key", || self.store.order_by_key(request.user_id, key))
                .await?;
            if let Some(order) = existing {
                tracing::info!(order_id = %order.id, user_id = %request.user_id, "Replaying idempotent order");
                return self.placed(order).await;
            }
        }

        let reservations = self.reserve_all(&request.line_items).await?;

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let total_amount: Decimal = reservations.iter().map(Reservation::subtotal).sum();
        let order = Order {
            id: order_id,
            user_id: request.user_id,
            idempotency_key: request.idempotency_key,
            total_amount,
            status: OrderStatus::Pending,
            payment_method: None,
            payment_reference: None,
            created_at: now,
            updated_at: now,
        };

        let mut tickets = Vec::new();
        for reservation in &reservations {
            for _ in 0..reservation.quantity {
                tickets.push(self.issuer.issue(
                    order_id,
                    reservation.ticket_type_id,
                    request.user_id,
                    reservation.event_id,
                    reservation.unit_price,
                ));
            }
        }
        let hold_ids: Vec<Uuid> = reservations.iter().map(|r| r.hold.id).collect();

        let persisted = self
            .issuer
            .persist(self.store.as_ref(), &self.retry, &order, &mut tickets, &hold_ids)
            .await;

        match persisted {
            Ok(Persisted::Committed) => {
                tracing::info!(
                    %order_id,
                    user_id = %order.user_id,
                    tickets = tickets.len(),
                    total = %order.total_amount,
                    "Order committed"
                );
                self.notifier.publish(&tickets);
                Ok(PlacedOrder { order, tickets })
            }
            Ok(Persisted::Duplicate(existing_id)) => {
                self.roll_back(&reservations).await;
                tracing::info!(order_id = %existing_id, "Concurrent idempotent order won, replaying it");
                let existing = self
                    .retry
                    .run("order.get", || self.store.order(existing_id))
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("order {existing_id}")))?;
                self.placed(existing).await
            }
            Ok(Persisted::HoldsExpired(expired)) => {
                tracing::warn!(
                    %order_id,
                    expired = expired.len(),
                    "Holds reclaimed before commit, releasing the rest"
                );
                self.roll_back(&reservations).await;
                Err(OrderError::HoldsExpired)
            }
            Err(err) => {
                tracing::error!(%order_id, error = %err, "Order commit failed, releasing inventory");
                self.roll_back(&reservations).await;
                Err(err.into())
            }
        }
    }

    /// The order and its tickets, if the order exists.
    pub async fn find_order(&self, order_id: Uuid) -> Result<Option<PlacedOrder>, OrderError> {
        let order = self
            .retry
            .run("order.get", || self.store.order(order_id))
            .await?;
        match order {
            Some(order) => Ok(Some(self.placed(order).await?)),
            None => Ok(None),
        }
    }

    async fn placed(&self, order: Order) -> Result<PlacedOrder, OrderError> {
        let tickets = self
            .retry
            .run("order.tickets", || self.store.tickets_for_order(order.id))
            .await?;
        Ok(PlacedOrder { order, tickets })
    }

    /// Rejects malformed requests before any inventory is touched.
    fn validate(&self, line_items: &[LineItemRequest]) -> Result<(), OrderError> {
        if line_items.is_empty() {
            return Err(OrderError::EmptyOrder);
        }
        let limit = i64::from(self.engine.max_per_order());
        let mut requested: i64 = 0;
        for item in line_items {
            requested += i64::from(item.quantity);
            if item.quantity <= 0 || requested > limit {
                return Err(Rejection::InvalidQuantity {
                    ticket_type_id: item.ticket_type_id,
                    quantity: item.quantity,
                }
                .into());
            }
        }
        Ok(())
    }

    async fn reserve_all(&self, line_items: &[LineItemRequest]) -> Result<Vec<Reservation>, OrderError> {
        let mut granted: Vec<Reservation> = Vec::with_capacity(line_items.len());
        for item in line_items {
            match self
                .engine
                .reserve_line_item(item.ticket_type_id, item.quantity)
                .await
            {
                Ok(reservation) => granted.push(reservation),
                Err(err) => {
                    tracing::info!(
                        ticket_type_id = %item.ticket_type_id,
                        quantity = item.quantity,
                        error = %err,
                        released = granted.len(),
                        "Line item refused, rolling back order"
                    );
                    self.roll_back(&granted).await;
                    return Err(err.into());
                }
            }
        }
        Ok(granted)
    }

    /// Compensating release of every granted hold. A hold that cannot be released
    /// now stays journaled and is returned by the reconciler once stale.
    async fn roll_back(&self, reservations: &[Reservation]) {
        for reservation in reservations.iter().rev() {
            if let Err(err) = self.ledger.release(&reservation.hold).await {
                tracing::error!(
                    hold_id = %reservation.hold.id,
                    ticket_type_id = %reservation.ticket_type_id,
                    quantity = reservation.quantity,
                    error = %err,
                    "Rollback release failed; left for reconciliation"
                );
            }
        }
    }
}
