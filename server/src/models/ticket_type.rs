use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::UnknownStatus;

/// Availability of a ticket type.
///
/// `Active` and `SoldOut` are derived from the counters on every ledger
/// mutation; `Hidden` is an administrative flag that ledger mutations keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketTypeStatus {
    Active,
    SoldOut,
    Hidden,
}

impl TicketTypeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketTypeStatus::Active => "active",
            TicketTypeStatus::SoldOut => "sold_out",
            TicketTypeStatus::Hidden => "hidden",
        }
    }

    /// Status a ticket type should carry for the given counters.
    pub fn derive(hidden: bool, quantity_sold: i32, quantity_total: i32) -> Self {
        if hidden {
            TicketTypeStatus::Hidden
        } else if quantity_sold >= quantity_total {
            TicketTypeStatus::SoldOut
        } else {
            TicketTypeStatus::Active
        }
    }
}

impl TryFrom<String> for TicketTypeStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(TicketTypeStatus::Active),
            "sold_out" => Ok(TicketTypeStatus::SoldOut),
            "hidden" => Ok(TicketTypeStatus::Hidden),
            _ => Err(UnknownStatus(value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub quantity_total: i32,
    pub quantity_sold: i32,
    #[sqlx(try_from = "String")]
    pub status: TicketTypeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TicketType {
    pub fn new(event_id: Uuid, name: impl Into<String>, price: Decimal, quantity_total: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            event_id,
            name: name.into(),
            price,
            quantity_total,
            quantity_sold: 0,
            status: TicketTypeStatus::derive(false, 0, quantity_total),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.status == TicketTypeStatus::Hidden
    }
}

/// Administrative edits that never touch the inventory counters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketTypeChanges {
    pub price: Option<Decimal>,
    pub hidden: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTicketType {
    pub event_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub quantity_total: i32,
}
