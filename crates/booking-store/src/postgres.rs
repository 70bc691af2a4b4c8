use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookingId, EventId, PaymentId, UserId};
use domain::{
    Attendee, Booking, BookingStatus, Event, Money, Payment, PaymentSettlement, Quantity,
    ReconciliationJob,
};
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    BookingQuery, Page, Result, StoreError,
    query::BookingScope,
    store::{BookingStore, BookingTransition, ReserveOutcome, UnitOfWork},
};

macro_rules! event_columns {
    () => {
        "id, title, price_cents, total_tickets, available_tickets, status, start_date, created_at"
    };
}

macro_rules! booking_columns {
    () => {
        "id, event_id, user_id, attendees, quantity, ticket_price_cents, total_price_cents, \
         payment_method, payment_status, status, cancellation_reason, created_at, updated_at"
    };
}

macro_rules! payment_columns {
    () => {
        "id, booking_id, user_id, amount_cents, payment_method, payment_status, receipt, \
         gateway_order_id, gateway_payment_id, gateway_signature, created_at, updated_at"
    };
}

/// PostgreSQL-backed booking store implementation.
#[derive(Clone)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Creates a new PostgreSQL booking store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn quantity_from_row(row: &PgRow) -> Result<Quantity> {
    let raw: i32 = row.try_get("quantity")?;
    Ok(Quantity::new(u32::try_from(raw).unwrap_or(0))?)
}

fn count_from_row(row: &PgRow, column: &str) -> Result<u32> {
    let raw: i32 = row.try_get(column)?;
    Ok(u32::try_from(raw).unwrap_or(0))
}

/// Converts a count to the `INTEGER` it is stored as.
fn db_count(field: &'static str, value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::OutOfRange { field, value })
}

fn row_to_event(row: PgRow) -> Result<Event> {
    Ok(Event {
        id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        title: row.try_get("title")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        total_tickets: count_from_row(&row, "total_tickets")?,
        available_tickets: count_from_row(&row, "available_tickets")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        start_date: row.try_get("start_date")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_booking(row: PgRow) -> Result<Booking> {
    let attendees: serde_json::Value = row.try_get("attendees")?;
    let attendees: Vec<Attendee> = serde_json::from_value(attendees)?;

    Ok(Booking {
        id: BookingId::from_uuid(row.try_get::<Uuid, _>("id")?),
        event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        attendees,
        quantity: quantity_from_row(&row)?,
        ticket_price: Money::from_cents(row.try_get("ticket_price_cents")?),
        total_price: Money::from_cents(row.try_get("total_price_cents")?),
        payment_method: row.try_get::<String, _>("payment_method")?.parse()?,
        payment_status: row.try_get::<String, _>("payment_status")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        cancellation_reason: row.try_get("cancellation_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_payment(row: PgRow) -> Result<Payment> {
    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
        booking_id: BookingId::from_uuid(row.try_get::<Uuid, _>("booking_id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        amount: Money::from_cents(row.try_get("amount_cents")?),
        payment_method: row.try_get::<String, _>("payment_method")?.parse()?,
        payment_status: row.try_get::<String, _>("payment_status")?.parse()?,
        receipt: row.try_get("receipt")?,
        gateway_order_id: row.try_get("gateway_order_id")?,
        gateway_payment_id: row.try_get("gateway_payment_id")?,
        gateway_signature: row.try_get("gateway_signature")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn fetch_event<'e, E: PgExecutor<'e>>(executor: E, event_id: EventId) -> Result<Option<Event>> {
    let row = sqlx::query(concat!(
        "SELECT ",
        event_columns!(),
        " FROM events WHERE id = $1"
    ))
    .bind(event_id.as_uuid())
    .fetch_optional(executor)
    .await?;
    row.map(row_to_event).transpose()
}

async fn fetch_payment_by_uuid(
    pool: &PgPool,
    sql: &'static str,
    id: Uuid,
) -> Result<Option<Payment>> {
    let row = sqlx::query(sql).bind(id).fetch_optional(pool).await?;
    row.map(row_to_payment).transpose()
}

async fn add_tickets<'e, E: PgExecutor<'e>>(
    executor: E,
    event_id: EventId,
    quantity: Quantity,
) -> Result<()> {
    let result =
        sqlx::query("UPDATE events SET available_tickets = available_tickets + $2 WHERE id = $1")
            .bind(event_id.as_uuid())
            .bind(db_count("quantity", quantity.get())?)
            .execute(executor)
            .await?;
    if result.rows_affected() == 0 {
        tracing::warn!(%event_id, "restore for unknown event ignored");
    }
    Ok(())
}

/// Appends the WHERE clause for a booking query, numbering parameters from `$1`.
fn booking_filter_sql(query: &BookingQuery) -> String {
    let mut sql = match query.scope {
        BookingScope::User(_) => String::from(" WHERE user_id = $1"),
        BookingScope::Event(_) => String::from(" WHERE event_id = $1"),
    };
    let mut param_count = 1;
    if query.status.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND status = ${param_count}"));
    }
    if query.created_from.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND created_at >= ${param_count}"));
    }
    if query.created_to.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND created_at <= ${param_count}"));
    }
    sql
}

fn scope_uuid(scope: BookingScope) -> Uuid {
    match scope {
        BookingScope::User(id) => id.as_uuid(),
        BookingScope::Event(id) => id.as_uuid(),
    }
}

#[async_trait]
impl BookingStore for PostgresBookingStore {
    type Tx = PostgresUnitOfWork;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(PostgresUnitOfWork {
            tx: self.pool.begin().await?,
        })
    }

    async fn insert_event(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (id, title, price_cents, total_tickets, available_tickets, status, start_date, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.title)
        .bind(event.price.cents())
        .bind(db_count("total_tickets", event.total_tickets)?)
        .bind(db_count("available_tickets", event.available_tickets)?)
        .bind(event.status.as_str())
        .bind(event.start_date)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::Duplicate {
                    entity: "event",
                    id: event.id.to_string(),
                };
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>> {
        fetch_event(&self.pool, event_id).await
    }

    async fn deactivate_started_events(&self, now: DateTime<Utc>) -> Result<Vec<EventId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE events SET status = 'inactive' WHERE status = 'active' AND start_date <= $1 RETURNING id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(EventId::from_uuid).collect())
    }

    async fn get_booking(&self, booking_id: BookingId) -> Result<Option<Booking>> {
        let row = sqlx::query(concat!(
            "SELECT ",
            booking_columns!(),
            " FROM bookings WHERE id = $1"
        ))
        .bind(booking_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_booking).transpose()
    }

    async fn get_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>> {
        fetch_payment_by_uuid(
            &self.pool,
            concat!("SELECT ", payment_columns!(), " FROM payments WHERE id = $1"),
            payment_id.as_uuid(),
        )
        .await
    }

    async fn find_payment_by_order(&self, gateway_order_id: &str) -> Result<Option<Payment>> {
        let row = sqlx::query(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE gateway_order_id = $1"
        ))
        .bind(gateway_order_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_payment).transpose()
    }

    async fn find_payment_by_booking(&self, booking_id: BookingId) -> Result<Option<Payment>> {
        fetch_payment_by_uuid(
            &self.pool,
            concat!("SELECT ", payment_columns!(), " FROM payments WHERE booking_id = $1"),
            booking_id.as_uuid(),
        )
        .await
    }

    async fn list_bookings(&self, query: &BookingQuery) -> Result<Page<Booking>> {
        let filter = booking_filter_sql(query);

        let count_sql = format!("SELECT COUNT(*) FROM bookings{filter}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(scope_uuid(query.scope));
        if let Some(status) = query.status {
            count_query = count_query.bind(status.as_str());
        }
        if let Some(from) = query.created_from {
            count_query = count_query.bind(from);
        }
        if let Some(to) = query.created_to {
            count_query = count_query.bind(to);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let page_sql = format!(
            "SELECT {} FROM bookings{filter} ORDER BY created_at DESC, id LIMIT {} OFFSET {}",
            booking_columns!(),
            query.limit,
            query.offset()
        );
        let mut page_query = sqlx::query(&page_sql).bind(scope_uuid(query.scope));
        if let Some(status) = query.status {
            page_query = page_query.bind(status.as_str());
        }
        if let Some(from) = query.created_from {
            page_query = page_query.bind(from);
        }
        if let Some(to) = query.created_to {
            page_query = page_query.bind(to);
        }
        let rows = page_query.fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(row_to_booking)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page::new(items, total.max(0) as u64, query))
    }

    async fn stale_pending_bookings(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReconciliationJob>> {
        let rows = sqlx::query(
            r#"
            SELECT b.id AS booking_id, b.event_id, b.quantity, b.created_at, p.id AS payment_id
            FROM bookings b
            JOIN payments p ON p.booking_id = b.id
            WHERE b.status = 'Pending' AND b.created_at < $1
            ORDER BY b.created_at ASC
            LIMIT $2
            "#,
        )
        .bind(created_before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ReconciliationJob {
                    booking_id: BookingId::from_uuid(row.try_get::<Uuid, _>("booking_id")?),
                    event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
                    quantity: quantity_from_row(&row)?,
                    payment_id: PaymentId::from_uuid(row.try_get::<Uuid, _>("payment_id")?),
                    fire_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

/// Unit of work backed by a PostgreSQL transaction.
///
/// Conditional updates take row locks, so a concurrent writer on the same
/// row waits for this transaction and then re-evaluates its own condition.
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn get_event(&mut self, event_id: EventId) -> Result<Option<Event>> {
        fetch_event(&mut *self.tx, event_id).await
    }

    async fn reserve_tickets(
        &mut self,
        event_id: EventId,
        quantity: Quantity,
    ) -> Result<ReserveOutcome> {
        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE events SET available_tickets = available_tickets - $2
            WHERE id = $1 AND status = 'active' AND available_tickets >= $2
            RETURNING available_tickets
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(db_count("quantity", quantity.get())?)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(remaining) = remaining {
            return Ok(ReserveOutcome::Reserved {
                remaining: u32::try_from(remaining).unwrap_or(0),
            });
        }

        // Nothing changed; report why.
        Ok(match fetch_event(&mut *self.tx, event_id).await? {
            None => ReserveOutcome::EventNotFound,
            Some(event) if !event.is_active() => ReserveOutcome::EventInactive,
            Some(event) => ReserveOutcome::InsufficientInventory {
                available: event.available_tickets,
            },
        })
    }

    async fn restore_tickets(&mut self, event_id: EventId, quantity: Quantity) -> Result<()> {
        add_tickets(&mut *self.tx, event_id, quantity).await
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<()> {
        let attendees = serde_json::to_value(&booking.attendees)?;
        sqlx::query(
            r#"
            INSERT INTO bookings (id, event_id, user_id, attendees, quantity, ticket_price_cents, total_price_cents,
                                  payment_method, payment_status, status, cancellation_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(booking.id.as_uuid())
        .bind(booking.event_id.as_uuid())
        .bind(booking.user_id.as_uuid())
        .bind(attendees)
        .bind(db_count("quantity", booking.quantity.get())?)
        .bind(booking.ticket_price.cents())
        .bind(booking.total_price.cents())
        .bind(booking.payment_method.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.status.as_str())
        .bind(&booking.cancellation_reason)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::Duplicate {
                    entity: "booking",
                    id: booking.id.to_string(),
                };
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, booking_id, user_id, amount_cents, payment_method, payment_status, receipt,
                                  gateway_order_id, gateway_payment_id, gateway_signature, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.booking_id.as_uuid())
        .bind(payment.user_id.as_uuid())
        .bind(payment.amount.cents())
        .bind(payment.payment_method.as_str())
        .bind(payment.payment_status.as_str())
        .bind(&payment.receipt)
        .bind(&payment.gateway_order_id)
        .bind(&payment.gateway_payment_id)
        .bind(&payment.gateway_signature)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                match db_err.constraint() {
                    Some("unique_payment_booking") | Some("unique_payment_order") => {
                        return StoreError::DuplicatePayment {
                            booking_id: payment.booking_id,
                            gateway_order_id: payment.gateway_order_id.clone(),
                        };
                    }
                    Some("payments_booking_id_fkey") => {
                        return StoreError::MissingBooking {
                            booking_id: payment.booking_id,
                            payment_id: payment.id,
                        };
                    }
                    _ => {}
                }
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn settle_payment(
        &mut self,
        payment_id: PaymentId,
        settlement: &PaymentSettlement,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET payment_status = $2,
                gateway_payment_id = COALESCE($3, gateway_payment_id),
                gateway_signature = COALESCE($4, gateway_signature),
                updated_at = NOW()
            WHERE id = $1 AND payment_status = 'Pending'
            "#,
        )
        .bind(payment_id.as_uuid())
        .bind(settlement.status.as_str())
        .bind(&settlement.gateway_payment_id)
        .bind(&settlement.gateway_signature)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn transition_booking(
        &mut self,
        booking_id: BookingId,
        transition: &BookingTransition,
    ) -> Result<bool> {
        if !BookingStatus::Pending.can_transition_to(transition.to) {
            return Ok(false);
        }
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $2,
                payment_status = $3,
                cancellation_reason = COALESCE($4, cancellation_reason),
                updated_at = NOW()
            WHERE id = $1 AND status = 'Pending'
            "#,
        )
        .bind(booking_id.as_uuid())
        .bind(transition.to.as_str())
        .bind(transition.payment_status.as_str())
        .bind(&transition.reason)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_filter_numbers_parameters_in_bind_order() {
        let from = Utc::now();
        let query = BookingQuery::for_user(UserId::new())
            .status(BookingStatus::Confirmed)
            .created_between(from, from);
        assert_eq!(
            booking_filter_sql(&query),
            " WHERE user_id = $1 AND status = $2 AND created_at >= $3 AND created_at <= $4"
        );

        let query = BookingQuery::for_event(EventId::new());
        assert_eq!(booking_filter_sql(&query), " WHERE event_id = $1");
    }

    #[test]
    fn test_counts_beyond_integer_column_are_rejected() {
        assert_eq!(db_count("total_tickets", 2_147_483_647).unwrap(), i32::MAX);
        assert!(matches!(
            db_count("total_tickets", 2_147_483_648),
            Err(StoreError::OutOfRange {
                field: "total_tickets",
                value: 2_147_483_648
            })
        ));
    }
}
