//! In-process backend. Each operation runs inside one critical section, which
//! is this backend's atomic conditional-update primitive.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CheckInOutcome, CommitOutcome, StoreResult, TicketStore, Transition};
use crate::models::{
    InventoryHold, Order, OrderStatus, PaymentDetails, ReportQuery, Ticket, TicketStatus,
    TicketType, TicketTypeChanges, TicketTypeStatus,
};

#[derive(Default)]
struct Inner {
    ticket_types: HashMap<Uuid, TicketType>,
    holds: HashMap<Uuid, InventoryHold>,
    orders: HashMap<Uuid, Order>,
    order_keys: HashMap<(Uuid, Uuid), Uuid>,
    tickets: HashMap<Uuid, Ticket>,
    codes: HashMap<String, Uuid>,
}

impl Inner {
    /// Applies a signed delta to `quantity_sold` if the result stays in bounds.
    fn adjust_sold(&mut self, ticket_type_id: Uuid, delta: i32) -> bool {
        let Some(ticket_type) = self.ticket_types.get_mut(&ticket_type_id) else {
            return false;
        };
        let next = ticket_type.quantity_sold + delta;
        if next < 0 || next > ticket_type.quantity_total {
            return false;
        }
        ticket_type.quantity_sold = next;
        ticket_type.status =
            TicketTypeStatus::derive(ticket_type.is_hidden(), next, ticket_type.quantity_total);
        ticket_type.updated_at = Utc::now();
        true
    }

    fn return_units(&mut self, ticket_type_id: Uuid, quantity: i32) {
        if !self.adjust_sold(ticket_type_id, -quantity) {
            tracing::error!(
                %ticket_type_id,
                quantity,
                "Refused to return more units than were sold"
            );
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of open hold quantities for a ticket type.
    pub async fn held_units(&self, ticket_type_id: Uuid) -> i32 {
        let inner = self.inner.lock().await;
        inner
            .holds
            .values()
            .filter(|hold| hold.ticket_type_id == ticket_type_id)
            .map(|hold| hold.quantity)
            .sum()
    }

    pub async fn order_count(&self) -> usize {
        self.inner.lock().await.orders.len()
    }

    pub async fn ticket_count(&self) -> usize {
        self.inner.lock().await.tickets.len()
    }

    /// Backdates a hold, as if its checkout had stalled.
    pub async fn age_hold(&self, hold_id: Uuid, created_at: DateTime<Utc>) {
        if let Some(hold) = self.inner.lock().await.holds.get_mut(&hold_id) {
            hold.created_at = created_at;
        }
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn insert_ticket_type(&self, ticket_type: &TicketType) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.ticket_types.insert(ticket_type.id, ticket_type.clone());
        Ok(())
    }

    async fn ticket_type(&self, id: Uuid) -> StoreResult<Option<TicketType>> {
        Ok(self.inner.lock().await.ticket_types.get(&id).cloned())
    }

    async fn update_ticket_type(
        &self,
        id: Uuid,
        changes: &TicketTypeChanges,
    ) -> StoreResult<Option<TicketType>> {
        let mut inner = self.inner.lock().await;
        let Some(ticket_type) = inner.ticket_types.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(price) = changes.price {
            ticket_type.price = price;
        }
        if let Some(hidden) = changes.hidden {
            ticket_type.status = TicketTypeStatus::derive(
                hidden,
                ticket_type.quantity_sold,
                ticket_type.quantity_total,
            );
        }
        ticket_type.updated_at = Utc::now();
        Ok(Some(ticket_type.clone()))
    }

    async fn reserve(&self, hold: &InventoryHold) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.holds.contains_key(&hold.id) {
            return Ok(true);
        }
        if hold.quantity <= 0 || !inner.adjust_sold(hold.ticket_type_id, hold.quantity) {
            return Ok(false);
        }
        inner.holds.insert(hold.id, hold.clone());
        Ok(true)
    }

    async fn release(&self, hold_id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(hold) = inner.holds.remove(&hold_id) else {
            return Ok(false);
        };
        inner.return_units(hold.ticket_type_id, hold.quantity);
        Ok(true)
    }

    async fn commit_order(
        &self,
        order: &Order,
        tickets: &[Ticket],
        hold_ids: &[Uuid],
    ) -> StoreResult<CommitOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.orders.contains_key(&order.id) {
            return Ok(CommitOutcome::Committed);
        }
        if let Some(key) = order.idempotency_key {
            if let Some(existing) = inner.order_keys.get(&(order.user_id, key)) {
                return Ok(CommitOutcome::Duplicate(*existing));
            }
        }

        let mut seen = HashMap::new();
        let collisions: Vec<usize> = tickets
            .iter()
            .enumerate()
            .filter(|(index, ticket)| {
                inner.codes.contains_key(&ticket.code)
                    || seen.insert(ticket.code.as_str(), *index).is_some()
            })
            .map(|(index, _)| index)
            .collect();
        if !collisions.is_empty() {
            return Ok(CommitOutcome::CodeCollision(collisions));
        }

        let expired: Vec<Uuid> = hold_ids
            .iter()
            .filter(|hold_id| !inner.holds.contains_key(hold_id))
            .copied()
            .collect();
        if !expired.is_empty() {
            return Ok(CommitOutcome::HoldsExpired(expired));
        }

        inner.orders.insert(order.id, order.clone());
        if let Some(key) = order.idempotency_key {
            inner.order_keys.insert((order.user_id, key), order.id);
        }
        for ticket in tickets {
            inner.codes.insert(ticket.code.clone(), ticket.id);
            inner.tickets.insert(ticket.id, ticket.clone());
        }
        for hold_id in hold_ids {
            inner.holds.remove(hold_id);
        }
        Ok(CommitOutcome::Committed)
    }

    async fn check_in(&self, code: &str, at: DateTime<Utc>) -> StoreResult<CheckInOutcome> {
        let mut inner = self.inner.lock().await;
        let Some(ticket_id) = inner.codes.get(code).copied() else {
            return Ok(CheckInOutcome::NotFound);
        };
        let Some(ticket) = inner.tickets.get_mut(&ticket_id) else {
            return Ok(CheckInOutcome::NotFound);
        };
        Ok(match ticket.status {
            TicketStatus::Valid => {
                ticket.status = TicketStatus::Used;
                ticket.used_at = Some(at);
                CheckInOutcome::Redeemed(ticket.clone())
            }
            TicketStatus::Used => CheckInOutcome::AlreadyUsed(ticket.clone()),
            TicketStatus::Cancelled => CheckInOutcome::Cancelled(ticket.clone()),
        })
    }

    async fn cancel_ticket(&self, ticket_id: Uuid) -> StoreResult<Transition<Ticket>> {
        let mut inner = self.inner.lock().await;
        let Some(ticket) = inner.tickets.get_mut(&ticket_id) else {
            return Ok(Transition::NotFound);
        };
        if !ticket.status.can_transition_to(TicketStatus::Cancelled) {
            return Ok(Transition::Refused(ticket.clone()));
        }
        ticket.status = TicketStatus::Cancelled;
        Ok(Transition::Applied(ticket.clone()))
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        payment: Option<&PaymentDetails>,
    ) -> StoreResult<Transition<Order>> {
        let mut inner = self.inner.lock().await;
        let Some(order) = inner.orders.get_mut(&order_id) else {
            return Ok(Transition::NotFound);
        };
        if !order.status.can_transition_to(target) {
            return Ok(Transition::Refused(order.clone()));
        }
        order.status = target;
        if let Some(payment) = payment {
            order.payment_method = Some(payment.method.clone());
            order.payment_reference = Some(payment.reference.clone());
        }
        order.updated_at = Utc::now();
        let updated = order.clone();

        if target.voids_tickets() {
            inner
                .tickets
                .values_mut()
                .filter(|ticket| ticket.order_id == order_id && ticket.status == TicketStatus::Valid)
                .for_each(|ticket| ticket.status = TicketStatus::Cancelled);
        }
        Ok(Transition::Applied(updated))
    }

    async fn order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.inner.lock().await.orders.get(&id).cloned())
    }

    async fn order_by_key(
        &self,
        user_id: Uuid,
        idempotency_key: Uuid,
    ) -> StoreResult<Option<Order>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .order_keys
            .get(&(user_id, idempotency_key))
            .and_then(|id| inner.orders.get(id))
            .cloned())
    }

    async fn tickets_for_order(&self, order_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let inner = self.inner.lock().await;
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|ticket| ticket.order_id == order_id)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.code.cmp(&b.code)));
        Ok(tickets)
    }

    async fn ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        Ok(self.inner.lock().await.tickets.get(&id).cloned())
    }

    async fn stale_holds(
        &self,
        older_than: DateTime<Utc>,
        ticket_type_id: Option<Uuid>,
    ) -> StoreResult<Vec<InventoryHold>> {
        let inner = self.inner.lock().await;
        let mut holds: Vec<InventoryHold> = inner
            .holds
            .values()
            .filter(|hold| hold.created_at < older_than)
            .filter(|hold| ticket_type_id.map_or(true, |id| hold.ticket_type_id == id))
            .cloned()
            .collect();
        holds.sort_by_key(|hold| hold.created_at);
        Ok(holds)
    }

    async fn orders_in_range(&self, query: &ReportQuery) -> StoreResult<Vec<Order>> {
        let inner = self.inner.lock().await;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|order| query.covers(order.created_at))
            .filter(|order| {
                query.event_id.map_or(true, |event_id| {
                    inner
                        .tickets
                        .values()
                        .any(|ticket| ticket.order_id == order.id && ticket.event_id == event_id)
                })
            })
            .cloned()
            .collect();
        orders.sort_by_key(|order| order.created_at);
        Ok(orders)
    }

    async fn tickets_in_range(&self, query: &ReportQuery) -> StoreResult<Vec<Ticket>> {
        let inner = self.inner.lock().await;
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|ticket| query.covers(ticket.created_at))
            .filter(|ticket| query.event_id.map_or(true, |event_id| ticket.event_id == event_id))
            .cloned()
            .collect();
        tickets.sort_by_key(|ticket| ticket.created_at);
        Ok(tickets)
    }
}
