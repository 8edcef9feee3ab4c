//! Postgres backend. Counter and status changes are conditional `UPDATE`
//! statements; multi-row changes run in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{CheckInOutcome, CommitOutcome, StoreError, StoreResult, TicketStore, Transition};
use crate::models::{
    InventoryHold, Order, OrderStatus, PaymentDetails, ReportQuery, Ticket, TicketStatus,
    TicketType, TicketTypeChanges,
};

const TICKET_TYPE_COLUMNS: &str = "id, event_id, name, price, quantity_total, quantity_sold, \
     status, created_at, updated_at";
const ORDER_COLUMNS: &str = "id, user_id, idempotency_key, total_amount, status, \
     payment_method, payment_reference, created_at, updated_at";
const TICKET_COLUMNS: &str = "id, order_id, ticket_type_id, user_id, event_id, code, status, \
     price_at_purchase, used_at, created_at";

/// Claims units only while the result stays within capacity.
const RESERVE_UNITS: &str = r"
    UPDATE ticket_types
    SET quantity_sold = quantity_sold + $2,
        status = CASE
            WHEN status = 'hidden' THEN 'hidden'
            WHEN quantity_sold + $2 >= quantity_total THEN 'sold_out'
            ELSE 'active'
        END,
        updated_at = now()
    WHERE id = $1 AND quantity_sold + $2 <= quantity_total
";

/// Returns units only while the result stays non-negative.
const RETURN_UNITS: &str = r"
    UPDATE ticket_types
    SET quantity_sold = quantity_sold - $2,
        status = CASE
            WHEN status = 'hidden' THEN 'hidden'
            WHEN quantity_sold - $2 >= quantity_total THEN 'sold_out'
            ELSE 'active'
        END,
        updated_at = now()
    WHERE id = $1 AND quantity_sold >= $2
";

/// Redeem-then-lookup passes before a ticket still seen as `valid` is reported
/// as a transient failure.
const CHECK_IN_PASSES: usize = 2;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn return_units(
        tx: &mut Transaction<'_, Postgres>,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> StoreResult<()> {
        let result = sqlx::query(RETURN_UNITS)
            .bind(ticket_type_id)
            .bind(quantity)
            .execute(&mut **tx)
            .await?;
        if result.rows_affected() == 0 {
            tracing::error!(
                %ticket_type_id,
                quantity,
                "Refused to return more units than were sold"
            );
        }
        Ok(())
    }

    async fn fetch_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1");
        Ok(sqlx::query_as::<_, Ticket>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }
}

/// Classifies a ticket the conditional redeem did not match. `None` means the
/// ticket was still `valid`, so the redeem raced a concurrent change.
fn settled_check_in(current: Option<Ticket>) -> Option<CheckInOutcome> {
    match current {
        None => Some(CheckInOutcome::NotFound),
        Some(ticket) => match ticket.status {
            TicketStatus::Used => Some(CheckInOutcome::AlreadyUsed(ticket)),
            TicketStatus::Cancelled => Some(CheckInOutcome::Cancelled(ticket)),
            TicketStatus::Valid => None,
        },
    }
}

fn status_names(statuses: Vec<OrderStatus>) -> Vec<String> {
    statuses
        .into_iter()
        .map(|status| status.as_str().to_string())
        .collect()
}

#[async_trait]
impl TicketStore for PgStore {
    async fn insert_ticket_type(&self, ticket_type: &TicketType) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO ticket_types
                (id, event_id, name, price, quantity_total, quantity_sold, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(ticket_type.id)
        .bind(ticket_type.event_id)
        .bind(&ticket_type.name)
        .bind(ticket_type.price)
        .bind(ticket_type.quantity_total)
        .bind(ticket_type.quantity_sold)
        .bind(ticket_type.status.as_str())
        .bind(ticket_type.created_at)
        .bind(ticket_type.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ticket_type(&self, id: Uuid) -> StoreResult<Option<TicketType>> {
        let sql = format!("SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE id = $1");
        Ok(sqlx::query_as::<_, TicketType>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn update_ticket_type(
        &self,
        id: Uuid,
        changes: &TicketTypeChanges,
    ) -> StoreResult<Option<TicketType>> {
        let sql = format!(
            r"
            UPDATE ticket_types
            SET price = COALESCE($2, price),
                status = CASE
                    WHEN $3::boolean IS NULL THEN status
                    WHEN $3 THEN 'hidden'
                    WHEN quantity_sold >= quantity_total THEN 'sold_out'
                    ELSE 'active'
                END,
                updated_at = now()
            WHERE id = $1
            RETURNING {TICKET_TYPE_COLUMNS}
            "
        );
        Ok(sqlx::query_as::<_, TicketType>(&sql)
            .bind(id)
            .bind(changes.price)
            .bind(changes.hidden)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn reserve(&self, hold: &InventoryHold) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM inventory_holds WHERE id = $1")
                .bind(hold.id)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            tx.commit().await?;
            return Ok(true);
        }

        let claimed = sqlx::query(RESERVE_UNITS)
            .bind(hold.ticket_type_id)
            .bind(hold.quantity)
            .execute(&mut *tx)
            .await?;
        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO inventory_holds (id, ticket_type_id, quantity, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(hold.id)
        .bind(hold.ticket_type_id)
        .bind(hold.quantity)
        .bind(hold.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn release(&self, hold_id: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let removed: Option<(Uuid, i32)> = sqlx::query_as(
            "DELETE FROM inventory_holds WHERE id = $1 RETURNING ticket_type_id, quantity",
        )
        .bind(hold_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((ticket_type_id, quantity)) = removed else {
            tx.rollback().await?;
            return Ok(false);
        };

        Self::return_units(&mut tx, ticket_type_id, quantity).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn commit_order(
        &self,
        order: &Order,
        tickets: &[Ticket],
        hold_ids: &[Uuid],
    ) -> StoreResult<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        let already: Option<Uuid> = sqlx::query_scalar("SELECT id FROM orders WHERE id = $1")
            .bind(order.id)
            .fetch_optional(&mut *tx)
            .await?;
        if already.is_some() {
            tx.commit().await?;
            return Ok(CommitOutcome::Committed);
        }

        let inserted = sqlx::query(
            r"
            INSERT INTO orders
                (id, user_id, idempotency_key, total_amount, status, payment_method,
                 payment_reference, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id, idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING
            ",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.idempotency_key)
        .bind(order.total_amount)
        .bind(order.status.as_str())
        .bind(&order.payment_method)
        .bind(&order.payment_reference)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            let existing = match order.idempotency_key {
                Some(key) => self.order_by_key(order.user_id, key).await?,
                None => None,
            };
            return match existing {
                Some(existing) => Ok(CommitOutcome::Duplicate(existing.id)),
                None => Err(StoreError::Backend(format!(
                    "order {} was neither inserted nor found",
                    order.id
                ))),
            };
        }

        let mut collisions = Vec::new();
        for (index, ticket) in tickets.iter().enumerate() {
            let written = sqlx::query(
                r"
                INSERT INTO tickets
                    (id, order_id, ticket_type_id, user_id, event_id, code, status,
                     price_at_purchase, used_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (code) DO NOTHING
                ",
            )
            .bind(ticket.id)
            .bind(ticket.order_id)
            .bind(ticket.ticket_type_id)
            .bind(ticket.user_id)
            .bind(ticket.event_id)
            .bind(&ticket.code)
            .bind(ticket.status.as_str())
            .bind(ticket.price_at_purchase)
            .bind(ticket.used_at)
            .bind(ticket.created_at)
            .execute(&mut *tx)
            .await?;
            if written.rows_affected() == 0 {
                collisions.push(index);
            }
        }
        if !collisions.is_empty() {
            tx.rollback().await?;
            return Ok(CommitOutcome::CodeCollision(collisions));
        }

        let consumed: Vec<Uuid> =
            sqlx::query_scalar("DELETE FROM inventory_holds WHERE id = ANY($1) RETURNING id")
                .bind(hold_ids)
                .fetch_all(&mut *tx)
                .await?;
        if consumed.len() != hold_ids.len() {
            tx.rollback().await?;
            let expired = hold_ids
                .iter()
                .filter(|hold_id| !consumed.contains(hold_id))
                .copied()
                .collect();
            return Ok(CommitOutcome::HoldsExpired(expired));
        }

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }

    async fn check_in(&self, code: &str, at: DateTime<Utc>) -> StoreResult<CheckInOutcome> {
        let redeem = format!(
            r"
            UPDATE tickets
            SET status = 'used', used_at = $2
            WHERE code = $1 AND status = 'valid'
            RETURNING {TICKET_COLUMNS}
            "
        );
        let lookup = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE code = $1");

        for _ in 0..CHECK_IN_PASSES {
            let redeemed = sqlx::query_as::<_, Ticket>(&redeem)
                .bind(code)
                .bind(at)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(ticket) = redeemed {
                return Ok(CheckInOutcome::Redeemed(ticket));
            }

            let current = sqlx::query_as::<_, Ticket>(&lookup)
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(outcome) = settled_check_in(current) {
                return Ok(outcome);
            }
        }

        Err(StoreError::Transient(format!(
            "ticket with code {code} kept changing during check-in"
        )))
    }

    async fn cancel_ticket(&self, ticket_id: Uuid) -> StoreResult<Transition<Ticket>> {
        let sql = format!(
            r"
            UPDATE tickets SET status = 'cancelled'
            WHERE id = $1 AND status = 'valid'
            RETURNING {TICKET_COLUMNS}
            "
        );
        let cancelled = sqlx::query_as::<_, Ticket>(&sql)
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(ticket) = cancelled {
            return Ok(Transition::Applied(ticket));
        }
        Ok(match self.fetch_ticket(ticket_id).await? {
            Some(current) => Transition::Refused(current),
            None => Transition::NotFound,
        })
    }

    async fn transition_order(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        payment: Option<&PaymentDetails>,
    ) -> StoreResult<Transition<Order>> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            r"
            UPDATE orders
            SET status = $2,
                payment_method = COALESCE($3, payment_method),
                payment_reference = COALESCE($4, payment_reference),
                updated_at = now()
            WHERE id = $1 AND status = ANY($5)
            RETURNING {ORDER_COLUMNS}
            "
        );
        let updated = sqlx::query_as::<_, Order>(&sql)
            .bind(order_id)
            .bind(target.as_str())
            .bind(payment.map(|p| p.method.as_str()))
            .bind(payment.map(|p| p.reference.as_str()))
            .bind(status_names(OrderStatus::sources_of(target)))
            .fetch_optional(&mut *tx)
            .await?;
        let Some(order) = updated else {
            tx.rollback().await?;
            return Ok(match self.order(order_id).await? {
                Some(current) => Transition::Refused(current),
                None => Transition::NotFound,
            });
        };

        if target.voids_tickets() {
            sqlx::query("UPDATE tickets SET status = 'cancelled' WHERE order_id = $1 AND status = 'valid'")
                .bind(order_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(Transition::Applied(order))
    }

    async fn order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        Ok(sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn order_by_key(
        &self,
        user_id: Uuid,
        idempotency_key: Uuid,
    ) -> StoreResult<Option<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 AND idempotency_key = $2"
        );
        Ok(sqlx::query_as::<_, Order>(&sql)
            .bind(user_id)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn tickets_for_order(&self, order_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE order_id = $1 ORDER BY created_at, code"
        );
        Ok(sqlx::query_as::<_, Ticket>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        self.fetch_ticket(id).await
    }

    async fn stale_holds(
        &self,
        older_than: DateTime<Utc>,
        ticket_type_id: Option<Uuid>,
    ) -> StoreResult<Vec<InventoryHold>> {
        Ok(sqlx::query_as::<_, InventoryHold>(
            r"
            SELECT id, ticket_type_id, quantity, created_at
            FROM inventory_holds
            WHERE created_at < $1 AND ($2::uuid IS NULL OR ticket_type_id = $2)
            ORDER BY created_at
            ",
        )
        .bind(older_than)
        .bind(ticket_type_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn orders_in_range(&self, query: &ReportQuery) -> StoreResult<Vec<Order>> {
        let sql = format!(
            r"
            SELECT {ORDER_COLUMNS} FROM orders o
            WHERE ($1::timestamptz IS NULL OR o.created_at >= $1)
              AND ($2::timestamptz IS NULL OR o.created_at < $2)
              AND ($3::uuid IS NULL OR EXISTS (
                    SELECT 1 FROM tickets t WHERE t.order_id = o.id AND t.event_id = $3))
            ORDER BY o.created_at
            "
        );
        Ok(sqlx::query_as::<_, Order>(&sql)
            .bind(query.from)
            .bind(query.to)
            .bind(query.event_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn tickets_in_range(&self, query: &ReportQuery) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            r"
            SELECT {TICKET_COLUMNS} FROM tickets
            WHERE ($1::timestamptz IS NULL OR created_at >= $1)
              AND ($2::timestamptz IS NULL OR created_at < $2)
              AND ($3::uuid IS NULL OR event_id = $3)
            ORDER BY created_at
            "
        );
        Ok(sqlx::query_as::<_, Ticket>(&sql)
            .bind(query.from)
            .bind(query.to)
            .bind(query.event_id)
            .fetch_all(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn ticket(status: TicketStatus) -> Ticket {
        Ticket {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            ticket_type_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            code: "ABCDE-FGHJK-LMNPQ-RSTUV".to_string(),
            status,
            price_at_purchase: Decimal::new(1000, 2),
            used_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_valid_ticket_after_missed_redeem_is_retried_not_unknown() {
        assert!(settled_check_in(Some(ticket(TicketStatus::Valid))).is_none());
    }

    #[test]
    fn test_settled_check_in_outcomes() {
        assert!(matches!(settled_check_in(None), Some(CheckInOutcome::NotFound)));
        assert!(matches!(
            settled_check_in(Some(ticket(TicketStatus::Used))),
            Some(CheckInOutcome::AlreadyUsed(_))
        ));
        assert!(matches!(
            settled_check_in(Some(ticket(TicketStatus::Cancelled))),
            Some(CheckInOutcome::Cancelled(_))
        ));
    }
}
