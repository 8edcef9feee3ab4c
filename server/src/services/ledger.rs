//! Inventory ledger: the only writer of `quantity_sold`.

use std::sync::Arc;

use uuid::Uuid;

use super::RetryPolicy;
use crate::models::InventoryHold;
use crate::store::{StoreResult, TicketStore};

pub struct InventoryLedger {
    store: Arc<dyn TicketStore>,
    retry: RetryPolicy,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn TicketStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Claims `quantity` units. `None` means the pool could not cover the request
    /// and nothing was mutated.
    pub async fn reserve(
        &self,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> StoreResult<Option<InventoryHold>> {
        let hold = InventoryHold::new(ticket_type_id, quantity);
        // The hold id makes a retried reserve land at most once.
        let granted = self
            .retry
            .run("inventory.reserve", || self.store.reserve(&hold))
            .await?;

        if granted {
            tracing::debug!(%ticket_type_id, quantity, hold_id = %hold.id, "Inventory reserved");
            Ok(Some(hold))
        } else {
            tracing::info!(%ticket_type_id, quantity, "Inventory reservation refused");
            Ok(None)
        }
    }

    /// Returns a hold's units. Releasing an already released hold is a no-op.
    pub async fn release(&self, hold: &InventoryHold) -> StoreResult<bool> {
        let released = self
            .retry
            .run("inventory.release", || self.store.release(hold.id))
            .await?;
        if released {
            tracing::info!(
                ticket_type_id = %hold.ticket_type_id,
                quantity = hold.quantity,
                hold_id = %hold.id,
                "Inventory released"
            );
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TicketType;
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_reserve_then_release_restores_count() {
        let store = Arc::new(MemoryStore::new());
        let ticket_type = TicketType::new(Uuid::new_v4(), "Floor", Decimal::new(5000, 2), 4);
        store.insert_ticket_type(&ticket_type).await.unwrap();
        let ledger = InventoryLedger::new(store.clone(), RetryPolicy::default());

        let hold = ledger.reserve(ticket_type.id, 3).await.unwrap().unwrap();
        assert!(ledger.reserve(ticket_type.id, 2).await.unwrap().is_none());

        assert!(ledger.release(&hold).await.unwrap());
        assert!(!ledger.release(&hold).await.unwrap());

        let stored = store.ticket_type(ticket_type.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity_sold, 0);
    }
}
