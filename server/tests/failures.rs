//! Checkout behavior when persistence or credential minting fails.

mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use boxoffice_server::config::CheckoutSettings;
use boxoffice_server::models::{
    CreateOrderRequest, InventoryHold, LineItemRequest, Order, OrderStatus, PaymentDetails,
    ReportQuery, Ticket, TicketType, TicketTypeChanges,
};
use boxoffice_server::services::{
    CodeSource, InventoryLedger, MockPaymentGateway, OrderError, RandomCodes, Reconciler,
    RetryPolicy,
};
use boxoffice_server::state::AppState;
use boxoffice_server::store::{
    CheckInOutcome, CommitOutcome, MemoryStore, StoreError, StoreResult, TicketStore, Transition,
};

/// Delegates to a [`MemoryStore`], injecting failures and interleavings.
struct FaultyStore {
    inner: Arc<MemoryStore>,
    lookup_failures: Mutex<u32>,
    commit_failures: Mutex<u32>,
    commit_error: fn() -> StoreError,
    sweep_before_commit: Option<Arc<Reconciler>>,
}

impl FaultyStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            lookup_failures: Mutex::new(0),
            commit_failures: Mutex::new(0),
            commit_error: || StoreError::Backend("unreachable".to_string()),
            sweep_before_commit: None,
        }
    }

    fn failing_commits(mut self, failures: u32, error: fn() -> StoreError) -> Self {
        self.commit_failures = Mutex::new(failures);
        self.commit_error = error;
        self
    }

    fn failing_lookups(mut self, failures: u32) -> Self {
        self.lookup_failures = Mutex::new(failures);
        self
    }

    /// Ages every hold of the commit past the timeout and runs `reconciler`
    /// first, as if the checkout had stalled before committing.
    fn stalled_behind(mut self, reconciler: Arc<Reconciler>) -> Self {
        self.sweep_before_commit = Some(reconciler);
        self
    }
}

fn take_failure(remaining: &Mutex<u32>) -> bool {
    let mut remaining = remaining.lock().unwrap();
    if *remaining > 0 {
        *remaining -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl TicketStore for FaultyStore {
    async fn insert_ticket_type(&self, ticket_type: &TicketType) -> StoreResult<()> {
        self.inner.insert_ticket_type(ticket_type).await
    }

    async fn ticket_type(&self, id: Uuid) -> StoreResult<Option<TicketType>> {
        if take_failure(&self.lookup_failures) {
            return Err(StoreError::Transient("connection reset".to_string()));
        }
        self.inner.ticket_type(id).await
    }

    async fn update_ticket_type(
        &self,
        id: Uuid,
        changes: &TicketTypeChanges,
    ) -> StoreResult<Option<TicketType>> {
        self.inner.update_ticket_type(id, changes).await
    }

    async fn reserve(&self, hold: &InventoryHold) -> StoreResult<bool> {
        self.inner.reserve(hold).await
    }

    async fn release(&self, hold_id: Uuid) -> StoreResult<bool> {
        self.inner.release(hold_id).await
    }

    async fn commit_order(
        &self,
        order: &Order,
        tickets: &[Ticket],
        hold_ids: &[Uuid],
    ) -> StoreResult<CommitOutcome> {
        if take_failure(&self.commit_failures) {
            return Err((self.commit_error)());
        }
        if let Some(reconciler) = &self.sweep_before_commit {
            for hold_id in hold_ids {
                self.inner
                    .age_hold(*hold_id, Utc::now() - Duration::hours(1))
                    .await;
            }
            reconciler.reconcile_all().await?;
        }
        self.inner.commit_order(order, tickets, hold_ids).await
    }

    async fn check_in(&self, code: &str, at: DateTime<Utc>) -> StoreResult<CheckInOutcome> {
        self.inner.check_in(code, at).await
    }

    async fn cancel_ticket(&self, ticket_id: Uuid) -> StoreResult<Transition<Ticket>> {
        self.inner.cancel_ticket(ticket_id).await
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        payment: Option<&PaymentDetails>,
    ) -> StoreResult<Transition<Order>> {
        self.inner.transition_order(order_id, target, payment).await
    }

    async fn order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        self.inner.order(id).await
    }

    async fn order_by_key(
        &self,
        user_id: Uuid,
        idempotency_key: Uuid,
    ) -> StoreResult<Option<Order>> {
        self.inner.order_by_key(user_id, idempotency_key).await
    }

    async fn tickets_for_order(&self, order_id: Uuid) -> StoreResult<Vec<Ticket>> {
        self.inner.tickets_for_order(order_id).await
    }

    async fn ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        self.inner.ticket(id).await
    }

    async fn stale_holds(
        &self,
        older_than: DateTime<Utc>,
        ticket_type_id: Option<Uuid>,
    ) -> StoreResult<Vec<InventoryHold>> {
        self.inner.stale_holds(older_than, ticket_type_id).await
    }

    async fn orders_in_range(&self, query: &ReportQuery) -> StoreResult<Vec<Order>> {
        self.inner.orders_in_range(query).await
    }

    async fn tickets_in_range(&self, query: &ReportQuery) -> StoreResult<Vec<Ticket>> {
        self.inner.tickets_in_range(query).await
    }
}

/// Hands out queued codes first, then random ones.
struct ScriptedCodes {
    queued: Mutex<VecDeque<String>>,
    repeat_last: bool,
}

impl ScriptedCodes {
    fn queue(codes: &[&str]) -> Self {
        Self {
            queued: Mutex::new(codes.iter().map(|c| c.to_string()).collect()),
            repeat_last: false,
        }
    }

    fn always(code: &str) -> Self {
        Self {
            queued: Mutex::new(VecDeque::from([code.to_string()])),
            repeat_last: true,
        }
    }
}

impl CodeSource for ScriptedCodes {
    fn next_code(&self) -> String {
        let mut queued = self.queued.lock().unwrap();
        if self.repeat_last && queued.len() == 1 {
            return queued[0].clone();
        }
        queued.pop_front().unwrap_or_else(|| RandomCodes.next_code())
    }
}

fn fast_settings() -> CheckoutSettings {
    CheckoutSettings {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(1),
        },
        credential_attempts: 3,
        reconcile_interval: None,
        ..CheckoutSettings::default()
    }
}

async fn seeded(store: &MemoryStore, total: i32) -> TicketType {
    let ticket_type = TicketType::new(Uuid::new_v4(), "Floor", Decimal::new(4000, 2), total);
    store.insert_ticket_type(&ticket_type).await.unwrap();
    ticket_type
}

fn order_for(items: &[(Uuid, i32)]) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id: Uuid::new_v4(),
        line_items: items
            .iter()
            .map(|(ticket_type_id, quantity)| LineItemRequest {
                ticket_type_id: *ticket_type_id,
                quantity: *quantity,
            })
            .collect(),
        idempotency_key: None,
    }
}

async fn sold(store: &MemoryStore, id: Uuid) -> i32 {
    store.ticket_type(id).await.unwrap().unwrap().quantity_sold
}

#[tokio::test]
async fn test_failed_commit_releases_every_hold() {
    let memory = Arc::new(MemoryStore::new());
    let a = seeded(&memory, 10).await;
    let b = seeded(&memory, 10).await;
    let store = Arc::new(
        FaultyStore::new(memory.clone())
            .failing_commits(u32::MAX, || StoreError::Backend("disk full".to_string())),
    );
    let state = AppState::new(
        store,
        Arc::new(MockPaymentGateway::approving()),
        &fast_settings(),
    );

    let err = state
        .orders
        .create_order(order_for(&[(a.id, 2), (b.id, 3)]))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::Storage(StoreError::Backend(_))));
    assert_eq!(sold(&memory, a.id).await, 0);
    assert_eq!(sold(&memory, b.id).await, 0);
    assert_eq!(memory.held_units(a.id).await, 0);
    assert_eq!(memory.order_count().await, 0);
    assert_eq!(memory.ticket_count().await, 0);
}

#[tokio::test]
async fn test_transient_commit_failure_is_retried() {
    let memory = Arc::new(MemoryStore::new());
    let tier = seeded(&memory, 10).await;
    let store = Arc::new(
        FaultyStore::new(memory.clone())
            .failing_commits(2, || StoreError::Transient("connection reset".to_string())),
    );
    let state = AppState::new(
        store,
        Arc::new(MockPaymentGateway::approving()),
        &fast_settings(),
    );

    let placed = state
        .orders
        .create_order(order_for(&[(tier.id, 2)]))
        .await
        .unwrap();

    assert_eq!(placed.tickets.len(), 2);
    assert_eq!(sold(&memory, tier.id).await, 2);
    assert_eq!(memory.held_units(tier.id).await, 0);
}

#[tokio::test]
async fn test_colliding_code_is_regenerated() {
    let memory = Arc::new(MemoryStore::new());
    let tier = seeded(&memory, 10).await;
    let codes = Arc::new(ScriptedCodes::queue(&[
        "AAAAA-AAAAA-AAAAA-AAAAA",
        "AAAAA-AAAAA-AAAAA-AAAAA",
        "BBBBB-BBBBB-BBBBB-BBBBB",
    ]));
    let state = AppState::with_codes(
        memory.clone(),
        Arc::new(MockPaymentGateway::approving()),
        codes,
        &fast_settings(),
    );

    let first = state
        .orders
        .create_order(order_for(&[(tier.id, 1)]))
        .await
        .unwrap();
    let second = state
        .orders
        .create_order(order_for(&[(tier.id, 2)]))
        .await
        .unwrap();

    assert_eq!(first.tickets[0].code, "AAAAA-AAAAA-AAAAA-AAAAA");
    let second_codes: Vec<&str> = second.tickets.iter().map(|t| t.code.as_str()).collect();
    assert!(!second_codes.contains(&"AAAAA-AAAAA-AAAAA-AAAAA"));
    assert!(second_codes.contains(&"BBBBB-BBBBB-BBBBB-BBBBB"));
    assert_eq!(memory.ticket_count().await, 3);
}

#[tokio::test]
async fn test_exhausted_credentials_fail_and_release() {
    let memory = Arc::new(MemoryStore::new());
    let tier = seeded(&memory, 10).await;
    let state = AppState::with_codes(
        memory.clone(),
        Arc::new(MockPaymentGateway::approving()),
        Arc::new(ScriptedCodes::always("CCCCC-CCCCC-CCCCC-CCCCC")),
        &fast_settings(),
    );

    state
        .orders
        .create_order(order_for(&[(tier.id, 1)]))
        .await
        .unwrap();
    let err = state
        .orders
        .create_order(order_for(&[(tier.id, 1)]))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::CredentialsExhausted { attempts: 3 }));
    assert_eq!(sold(&memory, tier.id).await, 1);
    assert_eq!(memory.held_units(tier.id).await, 0);
}

#[tokio::test]
async fn test_reconciler_returns_orphaned_holds() {
    let memory = Arc::new(MemoryStore::new());
    let tier = seeded(&memory, 5).await;
    let state = AppState::new(
        memory.clone(),
        Arc::new(MockPaymentGateway::approving()),
        &fast_settings(),
    );

    // A checkout that crashed after reserving.
    let hold = InventoryHold::new(tier.id, 3);
    assert!(memory.reserve(&hold).await.unwrap());
    memory
        .age_hold(hold.id, Utc::now() - Duration::hours(1))
        .await;
    assert_eq!(sold(&memory, tier.id).await, 3);

    let report = state.reconciler.reconcile_all().await.unwrap();
    assert_eq!(report.released_holds, 1);
    assert_eq!(report.released_units, 3);
    assert_eq!(sold(&memory, tier.id).await, 0);

    let again = state.reconciler.reconcile_ticket_type(tier.id).await.unwrap();
    assert_eq!(again.released_holds, 0);
}

#[tokio::test]
async fn test_transient_lookup_during_reservation_is_retried() {
    let memory = Arc::new(MemoryStore::new());
    let tier = seeded(&memory, 10).await;
    let store = Arc::new(FaultyStore::new(memory.clone()).failing_lookups(1));
    let state = AppState::new(
        store,
        Arc::new(MockPaymentGateway::approving()),
        &fast_settings(),
    );

    let placed = state
        .orders
        .create_order(order_for(&[(tier.id, 1)]))
        .await
        .unwrap();

    assert_eq!(placed.tickets.len(), 1);
    assert_eq!(sold(&memory, tier.id).await, 1);
}

#[tokio::test]
async fn test_stalled_checkout_cannot_commit_reclaimed_holds() {
    let memory = Arc::new(MemoryStore::new());
    let a = seeded(&memory, 1).await;
    let b = seeded(&memory, 5).await;
    let settings = fast_settings();
    let reconciler = Arc::new(Reconciler::new(
        memory.clone(),
        Arc::new(InventoryLedger::new(memory.clone(), settings.retry)),
        settings.hold_stale_after,
    ));
    let store = Arc::new(FaultyStore::new(memory.clone()).stalled_behind(reconciler));
    let stalled = AppState::new(store, Arc::new(MockPaymentGateway::approving()), &settings);

    let err = stalled
        .orders
        .create_order(order_for(&[(a.id, 1), (b.id, 2)]))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::HoldsExpired));
    assert_eq!(memory.order_count().await, 0);
    assert_eq!(memory.ticket_count().await, 0);
    assert_eq!(sold(&memory, a.id).await, 0);
    assert_eq!(sold(&memory, b.id).await, 0);
    assert_eq!(memory.held_units(a.id).await, 0);

    // The reclaimed unit is sold to someone else exactly once.
    let healthy = AppState::new(
        memory.clone(),
        Arc::new(MockPaymentGateway::approving()),
        &settings,
    );
    healthy
        .orders
        .create_order(order_for(&[(a.id, 1)]))
        .await
        .unwrap();
    assert_eq!(sold(&memory, a.id).await, 1);
    assert_eq!(memory.ticket_count().await, 1);
}

#[tokio::test]
async fn test_reconciled_hold_is_not_committed_after_resale() {
    let memory = Arc::new(MemoryStore::new());
    let tier = seeded(&memory, 1).await;
    let state = AppState::new(
        memory.clone(),
        Arc::new(MockPaymentGateway::approving()),
        &fast_settings(),
    );

    let stalled = InventoryHold::new(tier.id, 1);
    assert!(memory.reserve(&stalled).await.unwrap());
    memory
        .age_hold(stalled.id, Utc::now() - Duration::hours(1))
        .await;
    let report = state.reconciler.reconcile_all().await.unwrap();
    assert_eq!(report.released_units, 1);

    let resold = state
        .orders
        .create_order(order_for(&[(tier.id, 1)]))
        .await
        .unwrap();

    let mut late_order = resold.order.clone();
    late_order.id = Uuid::new_v4();
    let mut late_ticket = resold.tickets[0].clone();
    late_ticket.id = Uuid::new_v4();
    late_ticket.order_id = late_order.id;
    late_ticket.code = "LATEE-LATEE-LATEE-LATEE".to_string();
    let outcome = memory
        .commit_order(&late_order, &[late_ticket], &[stalled.id])
        .await
        .unwrap();

    assert_eq!(outcome, CommitOutcome::HoldsExpired(vec![stalled.id]));
    let stored = memory.ticket_type(tier.id).await.unwrap().unwrap();
    assert_eq!(stored.quantity_sold, stored.quantity_total);
    assert_eq!(memory.ticket_count().await, 1);
    assert_eq!(memory.held_units(tier.id).await, 0);
}
