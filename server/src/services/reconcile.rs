//! Returns inventory stranded by checkouts that never finished.
//!
//! A hold outlives its checkout only when the process died, the request was
//! aborted, or a rollback release failed. Holds older than `stale_after` are
//! released; releasing an already released hold is a no-op, so the pass can
//! run any number of times, concurrently with itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::InventoryLedger;
use crate::store::{StoreError, StoreResult, TicketStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub released_holds: usize,
    pub released_units: i64,
}

pub struct Reconciler {
    store: Arc<dyn TicketStore>,
    ledger: Arc<InventoryLedger>,
    stale_after: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<dyn TicketStore>, ledger: Arc<InventoryLedger>, stale_after: Duration) -> Self {
        Self {
            store,
            ledger,
            stale_after,
        }
    }

    pub async fn reconcile_ticket_type(&self, ticket_type_id: Uuid) -> StoreResult<ReconcileReport> {
        self.sweep(Some(ticket_type_id)).await
    }

    pub async fn reconcile_all(&self) -> StoreResult<ReconcileReport> {
        self.sweep(None).await
    }

    async fn sweep(&self, ticket_type_id: Option<Uuid>) -> StoreResult<ReconcileReport> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|err| StoreError::Backend(format!("invalid hold timeout: {err}")))?;
        let cutoff = Utc::now() - stale_after;
        let holds = self.store.stale_holds(cutoff, ticket_type_id).await?;

        let mut report = ReconcileReport::default();
        for hold in holds {
            if self.ledger.release(&hold).await? {
                report.released_holds += 1;
                report.released_units += i64::from(hold.quantity);
            }
        }
        if report.released_holds > 0 {
            tracing::warn!(
                ticket_type_id = ?ticket_type_id,
                holds = report.released_holds,
                units = report.released_units,
                "Released stranded inventory"
            );
        }
        Ok(report)
    }

    /// Sweeps every `interval` until the task is aborted.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.reconcile_all().await {
                    tracing::error!(error = %err, "Reconciliation pass failed");
                }
            }
        })
    }
}
