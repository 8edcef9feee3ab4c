//! Check-in validator: redeems a credential exactly once.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::credentials::normalize_code;
use super::RetryPolicy;
use crate::models::Ticket;
use crate::store::{CheckInOutcome, StoreResult, TicketStore, Transition};

/// Deterministic scan results. Replays and cancellations are answers, not errors.
#[derive(Debug, Clone)]
pub enum CheckInResult {
    Admitted(Ticket),
    AlreadyUsed(Ticket),
    Cancelled(Ticket),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInRefusal {
    AlreadyUsed,
    Cancelled,
    NotFound,
}

impl CheckInResult {
    pub fn ticket(&self) -> Option<&Ticket> {
        match self {
            CheckInResult::Admitted(ticket)
            | CheckInResult::AlreadyUsed(ticket)
            | CheckInResult::Cancelled(ticket) => Some(ticket),
            CheckInResult::NotFound => None,
        }
    }

    pub fn refusal(&self) -> Option<CheckInRefusal> {
        match self {
            CheckInResult::Admitted(_) => None,
            CheckInResult::AlreadyUsed(_) => Some(CheckInRefusal::AlreadyUsed),
            CheckInResult::Cancelled(_) => Some(CheckInRefusal::Cancelled),
            CheckInResult::NotFound => Some(CheckInRefusal::NotFound),
        }
    }
}

pub struct CheckInValidator {
    store: Arc<dyn TicketStore>,
    retry: RetryPolicy,
}

impl CheckInValidator {
    pub fn new(store: Arc<dyn TicketStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub async fn check_in(&self, raw_code: &str) -> StoreResult<CheckInResult> {
        let code = normalize_code(raw_code);
        if code.is_empty() {
            return Ok(CheckInResult::NotFound);
        }
        let at = Utc::now();
        let outcome = self
            .retry
            .run("ticket.check_in", || self.store.check_in(&code, at))
            .await?;

        let result = match outcome {
            CheckInOutcome::Redeemed(ticket) => {
                tracing::info!(ticket_id = %ticket.id, event_id = %ticket.event_id, "Ticket checked in");
                CheckInResult::Admitted(ticket)
            }
            CheckInOutcome::AlreadyUsed(ticket) => {
                tracing::warn!(ticket_id = %ticket.id, used_at = ?ticket.used_at, "Replayed credential");
                CheckInResult::AlreadyUsed(ticket)
            }
            CheckInOutcome::Cancelled(ticket) => {
                tracing::warn!(ticket_id = %ticket.id, "Cancelled credential presented");
                CheckInResult::Cancelled(ticket)
            }
            CheckInOutcome::NotFound => {
                tracing::info!("Unknown credential presented");
                CheckInResult::NotFound
            }
        };
        Ok(result)
    }

    /// Administrative `valid -> cancelled`; the unit goes back to inventory.
    pub async fn cancel_ticket(&self, ticket_id: Uuid) -> StoreResult<Transition<Ticket>> {
        let transition = self
            .retry
            .run("ticket.cancel", || self.store.cancel_ticket(ticket_id))
            .await?;
        if let Transition::Applied(ticket) = &transition {
            tracing::info!(ticket_id = %ticket.id, ticket_type_id = %ticket.ticket_type_id, "Ticket cancelled");
        }
        Ok(transition)
    }
}
