//! Storage abstraction for the inventory ledger, orders and tickets.
//!
//! Every mutation of a contended value (`quantity_sold`, ticket `status`,
//! order `status`) is a single atomic, conditional operation of the backing
//! store. Callers never read a counter and write it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    InventoryHold, Order, OrderStatus, PaymentDetails, ReportQuery, Ticket, TicketType,
    TicketTypeChanges,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity, timeout or serialization failure. Safe to retry.
    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

// Postgres SQLSTATEs worth retrying.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                StoreError::Transient(err.to_string())
            }
            sqlx::Error::Database(db)
                if matches!(
                    db.code().as_deref(),
                    Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
                ) =>
            {
                StoreError::Transient(err.to_string())
            }
            sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// Result of atomically persisting an order with its tickets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Order, tickets and hold release are durable.
    Committed,
    /// Nothing was written; the tickets at these indices carry codes that already exist.
    CodeCollision(Vec<usize>),
    /// Nothing was written; the user already has an order under the same idempotency key.
    Duplicate(Uuid),
    /// Nothing was written; these holds were released (by reconciliation) before the commit.
    HoldsExpired(Vec<Uuid>),
}

/// Result of the atomic `valid -> used` transition.
#[derive(Debug, Clone)]
pub enum CheckInOutcome {
    Redeemed(Ticket),
    AlreadyUsed(Ticket),
    Cancelled(Ticket),
    NotFound,
}

/// Result of a conditional status transition.
#[derive(Debug, Clone)]
pub enum Transition<T> {
    Applied(T),
    /// The record exists but its current status does not permit the move.
    Refused(T),
    NotFound,
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert_ticket_type(&self, ticket_type: &TicketType) -> StoreResult<()>;

    async fn ticket_type(&self, id: Uuid) -> StoreResult<Option<TicketType>>;

    /// Price and visibility edits; never touches `quantity_sold`.
    async fn update_ticket_type(
        &self,
        id: Uuid,
        changes: &TicketTypeChanges,
    ) -> StoreResult<Option<TicketType>>;

    /// Conditionally adds `hold.quantity` to `quantity_sold` and journals the hold.
    ///
    /// Returns `false` without mutating anything when the increment would exceed
    /// `quantity_total`. Repeating a granted hold id reports `true` again.
    async fn reserve(&self, hold: &InventoryHold) -> StoreResult<bool>;

    /// Drops the hold and returns its units. `false` when the hold is already gone.
    async fn release(&self, hold_id: Uuid) -> StoreResult<bool>;

    /// Persists the order and its tickets and consumes the holds, all or nothing.
    /// Every hold in `hold_ids` must still be open for the commit to apply.
    async fn commit_order(
        &self,
        order: &Order,
        tickets: &[Ticket],
        hold_ids: &[Uuid],
    ) -> StoreResult<CommitOutcome>;

    async fn check_in(&self, code: &str, at: DateTime<Utc>) -> StoreResult<CheckInOutcome>;

    /// `valid -> cancelled`. The sold count is not touched.
    async fn cancel_ticket(&self, ticket_id: Uuid) -> StoreResult<Transition<Ticket>>;

    /// Moves an order to `target` if the transition table allows it. Entering a
    /// voiding status also cancels the order's valid tickets.
    async fn transition_order(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        payment: Option<&PaymentDetails>,
    ) -> StoreResult<Transition<Order>>;

    async fn order(&self, id: Uuid) -> StoreResult<Option<Order>>;

    async fn order_by_key(&self, user_id: Uuid, idempotency_key: Uuid)
        -> StoreResult<Option<Order>>;

    async fn tickets_for_order(&self, order_id: Uuid) -> StoreResult<Vec<Ticket>>;

    async fn ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>>;

    /// Holds created before `older_than`, optionally for a single ticket type.
    async fn stale_holds(
        &self,
        older_than: DateTime<Utc>,
        ticket_type_id: Option<Uuid>,
    ) -> StoreResult<Vec<InventoryHold>>;

    async fn orders_in_range(&self, query: &ReportQuery) -> StoreResult<Vec<Order>>;

    async fn tickets_in_range(&self, query: &ReportQuery) -> StoreResult<Vec<Ticket>>;
}
