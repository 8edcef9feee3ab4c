//! Publishes "ticket issued" facts to delivery collaborators.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::models::{Ticket, TicketIssued};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct IssuanceNotifier {
    sender: broadcast::Sender<TicketIssued>,
}

impl Default for IssuanceNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl IssuanceNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TicketIssued> {
        self.sender.subscribe()
    }

    /// Never blocks; facts published with no subscriber are dropped.
    pub fn publish(&self, tickets: &[Ticket]) {
        for ticket in tickets {
            if self.sender.send(TicketIssued::from(ticket)).is_err() {
                tracing::debug!(ticket_id = %ticket.id, "No issuance subscribers");
            }
        }
    }

    /// Logs every issued ticket until the channel closes.
    pub fn spawn_logger(&self) -> JoinHandle<()> {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(issued) => tracing::info!(
                        ticket_id = %issued.ticket_id,
                        order_id = %issued.order_id,
                        event_id = %issued.event_id,
                        user_id = %issued.user_id,
                        ticket_type_id = %issued.ticket_type_id,
                        "Ticket issued"
                    ),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Issuance log fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
