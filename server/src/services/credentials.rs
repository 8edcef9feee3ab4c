//! Credential issuer: mints ticket codes and persists them with a bounded
//! generate, verify, retry loop.

use std::sync::Arc;

use chrono::Utc;
use rand::{rngs::OsRng, Rng};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::RetryPolicy;
use crate::models::{Order, Ticket, TicketStatus};
use crate::store::{CommitOutcome, StoreError, TicketStore};

/// Unambiguous uppercase alphabet (no 0/O, 1/I).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_GROUPS: usize = 4;
const CODE_GROUP_LEN: usize = 5;

/// Source of credential codes.
pub trait CodeSource: Send + Sync {
    fn next_code(&self) -> String;
}

/// 100 bits from the operating system CSPRNG, formatted as `XXXXX-XXXXX-XXXXX-XXXXX`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodes;

impl CodeSource for RandomCodes {
    fn next_code(&self) -> String {
        let mut rng = OsRng;
        let mut code = String::with_capacity(CODE_GROUPS * (CODE_GROUP_LEN + 1));
        for group in 0..CODE_GROUPS {
            if group > 0 {
                code.push('-');
            }
            for _ in 0..CODE_GROUP_LEN {
                let index = rng.gen_range(0..CODE_ALPHABET.len());
                code.push(char::from(CODE_ALPHABET[index]));
            }
        }
        code
    }
}

/// Canonical form of a scanned or typed code.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("could not mint unique credentials after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// How a persisted order ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persisted {
    Committed,
    /// The user already has an order for this idempotency key.
    Duplicate(Uuid),
    /// Some holds were reclaimed before the commit; nothing was written.
    HoldsExpired(Vec<Uuid>),
}

pub struct CredentialIssuer {
    codes: Arc<dyn CodeSource>,
    max_attempts: u32,
}

impl CredentialIssuer {
    pub fn new(codes: Arc<dyn CodeSource>, max_attempts: u32) -> Self {
        Self {
            codes,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Mints a `valid` ticket with a fresh code. Nothing is written yet.
    pub fn issue(
        &self,
        order_id: Uuid,
        ticket_type_id: Uuid,
        user_id: Uuid,
        event_id: Uuid,
        unit_price: Decimal,
    ) -> Ticket {
        Ticket {
            id: Uuid::new_v4(),
            order_id,
            ticket_type_id,
            user_id,
            event_id,
            code: self.codes.next_code(),
            status: TicketStatus::Valid,
            price_at_purchase: unit_price,
            used_at: None,
            created_at: Utc::now(),
        }
    }

    /// Writes the order and its tickets in one atomic commit, replacing any codes
    /// the store reports as taken and trying again up to `max_attempts` times.
    pub async fn persist(
        &self,
        store: &dyn TicketStore,
        retry: &RetryPolicy,
        order: &Order,
        tickets: &mut [Ticket],
        hold_ids: &[Uuid],
    ) -> Result<Persisted, IssueError> {
        for attempt in 1..=self.max_attempts {
            let minted: &[Ticket] = tickets;
            let outcome = retry
                .run("order.commit", || store.commit_order(order, minted, hold_ids))
                .await?;

            match outcome {
                CommitOutcome::Committed => return Ok(Persisted::Committed),
                CommitOutcome::Duplicate(existing) => return Ok(Persisted::Duplicate(existing)),
                CommitOutcome::HoldsExpired(holds) => return Ok(Persisted::HoldsExpired(holds)),
                CommitOutcome::CodeCollision(indices) => {
                    tracing::warn!(
                        order_id = %order.id,
                        attempt,
                        collisions = indices.len(),
                        "Credential collision, regenerating codes"
                    );
                    for index in indices {
                        if let Some(ticket) = tickets.get_mut(index) {
                            ticket.code = self.codes.next_code();
                        }
                    }
                }
            }
        }

        tracing::error!(
            order_id = %order.id,
            attempts = self.max_attempts,
            "Credential issuance exhausted its attempts"
        );
        Err(IssueError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_codes_have_expected_shape() {
        let code = RandomCodes.next_code();
        assert_eq!(code.len(), 23);
        let groups: Vec<&str> = code.split('-').collect();
        assert_eq!(groups.len(), 4);
        assert!(groups.iter().all(|group| group.len() == 5));
        assert!(code
            .bytes()
            .filter(|b| *b != b'-')
            .all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_random_codes_do_not_repeat() {
        let codes: HashSet<String> = (0..10_000).map(|_| RandomCodes.next_code()).collect();
        assert_eq!(codes.len(), 10_000);
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  abcde-fghjk \n"), "ABCDE-FGHJK");
    }

    #[test]
    fn test_issue_starts_valid_and_unused() {
        let issuer = CredentialIssuer::new(Arc::new(RandomCodes), 3);
        let ticket = issuer.issue(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Decimal::new(1999, 2),
        );

        assert_eq!(ticket.status, TicketStatus::Valid);
        assert!(ticket.used_at.is_none());
        assert_eq!(ticket.price_at_purchase, Decimal::new(1999, 2));
    }
}
