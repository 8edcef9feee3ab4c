//! Reservation engine: validates a line item and claims its units.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::{InventoryLedger, RetryPolicy};
use crate::models::{InventoryHold, TicketTypeStatus};
use crate::store::{StoreError, TicketStore};

/// Why a line item could not be reserved. These are expected outcomes, not faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    #[error("ticket type {ticket_type_id} does not exist")]
    NotFound { ticket_type_id: Uuid },

    #[error("ticket type {ticket_type_id} is not on sale")]
    Inactive { ticket_type_id: Uuid },

    #[error("not enough tickets left for ticket type {ticket_type_id}")]
    InsufficientInventory { ticket_type_id: Uuid },

    #[error("quantity {quantity} is not allowed for ticket type {ticket_type_id}")]
    InvalidQuantity { ticket_type_id: Uuid, quantity: i32 },
}

impl Rejection {
    pub fn ticket_type_id(&self) -> Uuid {
        match self {
            Rejection::NotFound { ticket_type_id }
            | Rejection::Inactive { ticket_type_id }
            | Rejection::InsufficientInventory { ticket_type_id }
            | Rejection::InvalidQuantity { ticket_type_id, .. } => *ticket_type_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReserveError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Units claimed for one line item, with the price captured at claim time.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub hold: InventoryHold,
    pub ticket_type_id: Uuid,
    pub event_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl Reservation {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

pub struct ReservationEngine {
    store: Arc<dyn TicketStore>,
    ledger: Arc<InventoryLedger>,
    retry: RetryPolicy,
    max_per_order: i32,
}

impl ReservationEngine {
    pub fn new(
        store: Arc<dyn TicketStore>,
        ledger: Arc<InventoryLedger>,
        retry: RetryPolicy,
        max_per_order: i32,
    ) -> Self {
        Self {
            store,
            ledger,
            retry,
            max_per_order,
        }
    }

    pub fn max_per_order(&self) -> i32 {
        self.max_per_order
    }

    /// Validates the request and claims inventory. The only side effect is the
    /// ledger increment; credentials are minted later by the order commit.
    pub async fn reserve_line_item(
        &self,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> Result<Reservation, ReserveError> {
        if quantity <= 0 || quantity > self.max_per_order {
            return Err(Rejection::InvalidQuantity {
                ticket_type_id,
                quantity,
            }
            .into());
        }

        let ticket_type = self
            .retry
            .run("ticket_type.get", || self.store.ticket_type(ticket_type_id))
            .await?
            .ok_or(Rejection::NotFound { ticket_type_id })?;
        if ticket_type.status == TicketTypeStatus::Hidden {
            return Err(Rejection::Inactive { ticket_type_id }.into());
        }

        let hold = self
            .ledger
            .reserve(ticket_type_id, quantity)
            .await?
            .ok_or(Rejection::InsufficientInventory { ticket_type_id })?;

        Ok(Reservation {
            hold,
            ticket_type_id,
            event_id: ticket_type.event_id,
            quantity,
            unit_price: ticket_type.price,
        })
    }
}
