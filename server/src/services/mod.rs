//! Reservation and fulfillment services.

pub mod checkin;
pub mod credentials;
pub mod ledger;
pub mod notify;
pub mod orders;
pub mod payment;
pub mod reconcile;
pub mod reservation;
pub mod retry;
pub mod settlement;

pub use checkin::{CheckInRefusal, CheckInResult, CheckInValidator};
pub use credentials::{CodeSource, CredentialIssuer, RandomCodes};
pub use ledger::InventoryLedger;
pub use notify::IssuanceNotifier;
pub use orders::{OrderAggregator, OrderError};
pub use payment::{MockPaymentGateway, PaymentDecision, PaymentGateway};
pub use reconcile::{ReconcileReport, Reconciler};
pub use reservation::{Rejection, Reservation, ReservationEngine};
pub use retry::RetryPolicy;
pub use settlement::{OrderSettlement, Settled, SettlementError};
