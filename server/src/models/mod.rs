use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

pub mod order;
pub mod ticket;
pub mod ticket_type;

pub use order::{
    CreateOrderRequest, LineItemRequest, Order, OrderStatus, PaymentDetails, PlacedOrder,
};
pub use ticket::{CheckInRequest, Ticket, TicketIssued, TicketStatus};
pub use ticket_type::{NewTicketType, TicketType, TicketTypeChanges, TicketTypeStatus};

/// A status column held a value outside the known set.
#[derive(Debug, Error)]
#[error("unknown status value '{0}'")]
pub struct UnknownStatus(pub String);

/// Journal entry for units claimed from the ledger but not yet owned by tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct InventoryHold {
    pub id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

impl InventoryHold {
    pub fn new(ticket_type_id: Uuid, quantity: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_type_id,
            quantity,
            created_at: Utc::now(),
        }
    }
}

/// Filter for the read-only reporting queries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub event_id: Option<Uuid>,
}

impl ReportQuery {
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at < to)
    }
}
