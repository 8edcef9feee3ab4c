use std::sync::Arc;

use crate::config::CheckoutSettings;
use crate::services::{
    CheckInValidator, CodeSource, CredentialIssuer, InventoryLedger, IssuanceNotifier,
    OrderAggregator, OrderSettlement, PaymentGateway, RandomCodes, Reconciler, ReservationEngine,
};
use crate::store::TicketStore;

/// Shared handles for request handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TicketStore>,
    pub orders: Arc<OrderAggregator>,
    pub check_in: Arc<CheckInValidator>,
    pub settlement: Arc<OrderSettlement>,
    pub reconciler: Arc<Reconciler>,
    pub notifier: IssuanceNotifier,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TicketStore>,
        gateway: Arc<dyn PaymentGateway>,
        settings: &CheckoutSettings,
    ) -> Self {
        Self::with_codes(store, gateway, Arc::new(RandomCodes), settings)
    }

    pub fn with_codes(
        store: Arc<dyn TicketStore>,
        gateway: Arc<dyn PaymentGateway>,
        codes: Arc<dyn CodeSource>,
        settings: &CheckoutSettings,
    ) -> Self {
        let retry = settings.retry;
        let notifier = IssuanceNotifier::default();
        let ledger = Arc::new(InventoryLedger::new(store.clone(), retry));
        let engine = ReservationEngine::new(
            store.clone(),
            ledger.clone(),
            retry,
            settings.max_tickets_per_order,
        );
        let issuer = CredentialIssuer::new(codes, settings.credential_attempts);

        Self {
            orders: Arc::new(OrderAggregator::new(
                store.clone(),
                ledger.clone(),
                engine,
                issuer,
                notifier.clone(),
                retry,
            )),
            check_in: Arc::new(CheckInValidator::new(store.clone(), retry)),
            settlement: Arc::new(OrderSettlement::new(store.clone(), gateway, retry)),
            reconciler: Arc::new(Reconciler::new(
                store.clone(),
                ledger,
                settings.hold_stale_after,
            )),
            notifier,
            store,
        }
    }
}
