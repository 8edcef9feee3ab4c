use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::UnknownStatus;

/// Ticket lifecycle. Both `used` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Valid,
    Used,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Valid => "valid",
            TicketStatus::Used => "used",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (TicketStatus::Valid, TicketStatus::Used) | (TicketStatus::Valid, TicketStatus::Cancelled)
        )
    }
}

impl TryFrom<String> for TicketStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "valid" => Ok(TicketStatus::Valid),
            "used" => Ok(TicketStatus::Used),
            "cancelled" => Ok(TicketStatus::Cancelled),
            _ => Err(UnknownStatus(value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub ticket_type_id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub code: String,
    #[sqlx(try_from = "String")]
    pub status: TicketStatus,
    pub price_at_purchase: Decimal,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fact published once a ticket has been persisted, for delivery collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketIssued {
    pub ticket_id: Uuid,
    pub order_id: Uuid,
    pub code: String,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub ticket_type_id: Uuid,
}

impl From<&Ticket> for TicketIssued {
    fn from(ticket: &Ticket) -> Self {
        Self {
            ticket_id: ticket.id,
            order_id: ticket.order_id,
            code: ticket.code.clone(),
            event_id: ticket.event_id,
            user_id: ticket.user_id,
            ticket_type_id: ticket.ticket_type_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckInRequest {
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses_accept_nothing() {
        for next in [TicketStatus::Valid, TicketStatus::Used, TicketStatus::Cancelled] {
            assert!(!TicketStatus::Used.can_transition_to(next));
            assert!(!TicketStatus::Cancelled.can_transition_to(next));
        }
        assert!(TicketStatus::Valid.can_transition_to(TicketStatus::Used));
        assert!(TicketStatus::Valid.can_transition_to(TicketStatus::Cancelled));
    }
}
