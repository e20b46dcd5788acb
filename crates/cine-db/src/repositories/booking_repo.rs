//! Booking repository implementation
//!
//! Settled bookings are upserted together with their tickets. The frozen
//! pricing snapshot and the payment attempt are stored as JSONB; the payment
//! reference is duplicated into its own column so webhooks can find the
//! booking after it has left memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cine_core::{
    models::{
        Booking, BookingId, BookingStatus, CustomerId, PaymentAttempt, PricingSnapshot, SeatId,
        SeatType, ShowtimeId, Ticket, TicketPrice, TicketStatus,
    },
    traits::BookingRepository,
    AppError, AppResult,
};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// PostgreSQL implementation of BookingRepository
pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    /// Create a new booking repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn to_json<T: Serialize>(value: &Option<T>) -> AppResult<Option<String>> {
        value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::Serialization(e.to_string()))
    }

    fn from_json<T: DeserializeOwned>(raw: Option<&str>, what: &str) -> AppResult<Option<T>> {
        match raw {
            None | Some("null") => Ok(None),
            Some(raw) => serde_json::from_str(raw).map(Some).map_err(|e| {
                error!("Malformed stored {}: {}", what, e);
                AppError::Database(format!("Malformed stored {}: {}", what, e))
            }),
        }
    }

    /// Attach tickets to fetched booking rows, keeping row order
    async fn hydrate(&self, rows: Vec<BookingRow>) -> AppResult<Vec<Booking>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.booking_id).collect();
        let ticket_rows = sqlx::query_as::<sqlx::Postgres, TicketRow>(
            r#"
            SELECT ticket_id, booking_id, ticket_code, seat_id, seat_type,
                   base_price, surcharge, discount, final_price, status, checked_in_at
            FROM tickets
            WHERE booking_id = ANY($1)
            ORDER BY seat_id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading tickets: {}", e);
            AppError::Database(format!("Failed to load tickets: {}", e))
        })?;

        let mut tickets: HashMap<Uuid, Vec<Ticket>> = HashMap::new();
        for row in ticket_rows {
            let booking_id = row.booking_id;
            tickets
                .entry(booking_id)
                .or_default()
                .push(Ticket::try_from(row)?);
        }

        rows.into_iter()
            .map(|row| {
                let issued = tickets.remove(&row.booking_id).unwrap_or_default();
                row.into_booking(issued)
            })
            .collect()
    }

    async fn find_one(&self, filter: &str, bind: BindValue<'_>) -> AppResult<Option<Booking>> {
        let sql = format!("{} WHERE {} LIMIT 1", BOOKING_SELECT, filter);
        let query = sqlx::query_as::<sqlx::Postgres, BookingRow>(&sql);
        let query = match bind {
            BindValue::Id(id) => query.bind(id),
            BindValue::Text(text) => query.bind(text),
        };
        let row = query.fetch_optional(&self.pool).await.map_err(|e| {
            error!("Database error finding booking: {}", e);
            AppError::Database(format!("Failed to find booking: {}", e))
        })?;

        Ok(self.hydrate(row.into_iter().collect()).await?.pop())
    }
}

enum BindValue<'a> {
    Id(Uuid),
    Text(&'a str),
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    #[instrument(skip(self, booking), fields(booking_id = %booking.id, status = %booking.status()))]
    async fn save(&self, booking: &Booking) -> AppResult<()> {
        let pricing = Self::to_json(&booking.pricing)?;
        let payment = Self::to_json(&booking.payment)?;
        let payment_reference = booking.payment.as_ref().map(|p| p.reference.as_str());

        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Database(format!("Failed to start transaction: {}", e))
        })?;

        let written = sqlx::query(
            r#"
            INSERT INTO bookings (
                booking_id, booking_code, showtime_id, user_id, seat_ids, status,
                pricing, payment, payment_reference, payment_attempts,
                paid_at, closed_at, refund_reference, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7::jsonb, $8::jsonb, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (booking_id) DO UPDATE SET
                status = EXCLUDED.status,
                pricing = EXCLUDED.pricing,
                payment = EXCLUDED.payment,
                payment_reference = EXCLUDED.payment_reference,
                payment_attempts = EXCLUDED.payment_attempts,
                paid_at = EXCLUDED.paid_at,
                closed_at = EXCLUDED.closed_at,
                refund_reference = EXCLUDED.refund_reference,
                updated_at = EXCLUDED.updated_at
            WHERE bookings.updated_at <= EXCLUDED.updated_at
            "#,
        )
        .bind(booking.id)
        .bind(&booking.booking_code)
        .bind(booking.showtime_id)
        .bind(booking.customer_id)
        .bind(&booking.seat_ids)
        .bind(booking.status().to_string())
        .bind(pricing)
        .bind(payment)
        .bind(payment_reference)
        .bind(i32::try_from(booking.payment_attempts).unwrap_or(i32::MAX))
        .bind(booking.paid_at)
        .bind(booking.closed_at)
        .bind(&booking.refund_reference)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Database error saving booking {}: {}", booking.id, e);
            AppError::Database(format!("Failed to save booking: {}", e))
        })?;

        if written.rows_affected() == 0 {
            debug!("Skipped stale snapshot of booking {}", booking.id);
            return Ok(());
        }

        sqlx::query("DELETE FROM tickets WHERE booking_id = $1")
            .bind(booking.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error clearing tickets of {}: {}", booking.id, e);
                AppError::Database(format!("Failed to replace tickets: {}", e))
            })?;

        for ticket in &booking.tickets {
            sqlx::query(
                r#"
                INSERT INTO tickets (
                    ticket_id, booking_id, ticket_code, seat_id, seat_type,
                    base_price, surcharge, discount, final_price, status, checked_in_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(ticket.id)
            .bind(booking.id)
            .bind(&ticket.ticket_code)
            .bind(ticket.seat_id)
            .bind(ticket.seat_type.to_string())
            .bind(ticket.base_price)
            .bind(ticket.surcharge)
            .bind(ticket.discount)
            .bind(ticket.final_price)
            .bind(ticket.status().to_string())
            .bind(ticket.checked_in_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error saving ticket {}: {}", ticket.ticket_code, e);
                AppError::Database(format!("Failed to save ticket: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Database(format!("Failed to commit booking: {}", e))
        })?;

        debug!("Saved booking {} with {} tickets", booking.id, booking.tickets.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find(&self, id: BookingId) -> AppResult<Option<Booking>> {
        self.find_one("booking_id = $1", BindValue::Id(id)).await
    }

    #[instrument(skip(self))]
    async fn find_by_code(&self, booking_code: &str) -> AppResult<Option<Booking>> {
        self.find_one("booking_code = $1", BindValue::Text(booking_code))
            .await
    }

    #[instrument(skip(self))]
    async fn find_by_payment_reference(&self, reference: &str) -> AppResult<Option<Booking>> {
        self.find_one("payment_reference = $1", BindValue::Text(reference))
            .await
    }

    #[instrument(skip(self))]
    async fn find_by_customer(&self, customer_id: CustomerId) -> AppResult<Vec<Booking>> {
        let rows = sqlx::query_as::<sqlx::Postgres, BookingRow>(&format!(
            "{} WHERE user_id = $1 ORDER BY created_at DESC",
            BOOKING_SELECT
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing bookings of customer {}: {}", customer_id, e);
            AppError::Database(format!("Failed to list bookings: {}", e))
        })?;

        debug!("Found {} stored bookings for customer {}", rows.len(), customer_id);
        self.hydrate(rows).await
    }

    #[instrument(skip(self))]
    async fn sold_seats(&self, showtime_id: ShowtimeId) -> AppResult<Vec<SeatId>> {
        let rows: Vec<(SeatId,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT UNNEST(seat_ids) AS seat_id
            FROM bookings
            WHERE showtime_id = $1 AND status IN ('confirmed', 'refunded')
            ORDER BY seat_id
            "#,
        )
        .bind(showtime_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading sold seats of showtime {}: {}", showtime_id, e);
            AppError::Database(format!("Failed to load sold seats: {}", e))
        })?;

        Ok(rows.into_iter().map(|(seat,)| seat).collect())
    }
}

const BOOKING_SELECT: &str = r#"
    SELECT
        booking_id, booking_code, showtime_id, user_id, seat_ids, status,
        pricing::text AS pricing, payment::text AS payment, payment_attempts,
        paid_at, closed_at, refund_reference, created_at, updated_at
    FROM bookings
"#;

#[derive(Debug, sqlx::FromRow)]
struct BookingRow {
    booking_id: Uuid,
    booking_code: String,
    showtime_id: i32,
    user_id: i32,
    seat_ids: Vec<i32>,
    status: String,
    pricing: Option<String>,
    payment: Option<String>,
    payment_attempts: i32,
    paid_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    refund_reference: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BookingRow {
    fn into_booking(self, tickets: Vec<Ticket>) -> AppResult<Booking> {
        let status = BookingStatus::from_str(&self.status).ok_or_else(|| {
            error!(
                "Booking {} has unknown status '{}'",
                self.booking_code, self.status
            );
            AppError::Database(format!(
                "Unknown booking status '{}' for {}",
                self.status, self.booking_code
            ))
        })?;
        let pricing: Option<PricingSnapshot> =
            PgBookingRepository::from_json(self.pricing.as_deref(), "pricing")?;
        let payment: Option<PaymentAttempt> =
            PgBookingRepository::from_json(self.payment.as_deref(), "payment")?;

        let mut booking = Booking::draft(
            self.booking_id,
            self.showtime_id,
            self.user_id,
            self.seat_ids,
            self.created_at,
        );
        booking.booking_code = self.booking_code;
        booking.restore_status(status);
        booking.pricing = pricing;
        booking.payment = payment;
        booking.payment_attempts = u32::try_from(self.payment_attempts).unwrap_or(0);
        booking.tickets = tickets;
        booking.paid_at = self.paid_at;
        booking.closed_at = self.closed_at;
        booking.refund_reference = self.refund_reference;
        booking.updated_at = self.updated_at;
        Ok(booking)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TicketRow {
    ticket_id: Uuid,
    booking_id: Uuid,
    ticket_code: String,
    seat_id: i32,
    seat_type: String,
    base_price: Decimal,
    surcharge: Decimal,
    discount: Decimal,
    final_price: Decimal,
    status: String,
    checked_in_at: Option<DateTime<Utc>>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = AppError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let status = TicketStatus::from_str(&row.status).ok_or_else(|| {
            error!("Ticket {} has unknown status '{}'", row.ticket_code, row.status);
            AppError::Database(format!(
                "Unknown ticket status '{}' for {}",
                row.status, row.ticket_code
            ))
        })?;

        let mut ticket = Ticket::issue(&TicketPrice {
            seat_id: row.seat_id,
            seat_type: SeatType::from_str(&row.seat_type).unwrap_or(SeatType::Standard),
            base_price: row.base_price,
            surcharge: row.surcharge,
            discount: row.discount,
            final_price: row.final_price,
        });
        ticket.id = row.ticket_id;
        ticket.ticket_code = row.ticket_code;
        ticket.checked_in_at = row.checked_in_at;
        ticket.restore_status(status);
        Ok(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn booking_row(status: &str, payment: Option<&str>) -> BookingRow {
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 18, 0, 0).unwrap();
        BookingRow {
            booking_id: Uuid::new_v4(),
            booking_code: "BK202602011800001234".to_string(),
            showtime_id: 1,
            user_id: 7,
            seat_ids: vec![4, 3],
            status: status.to_string(),
            pricing: None,
            payment: payment.map(str::to_string),
            payment_attempts: 2,
            paid_at: Some(at),
            closed_at: None,
            refund_reference: None,
            created_at: at,
            updated_at: at + chrono::Duration::minutes(3),
        }
    }

    fn ticket_row(booking_id: Uuid, status: &str) -> TicketRow {
        TicketRow {
            ticket_id: Uuid::new_v4(),
            booking_id,
            ticket_code: "TK0A1B2C3D".to_string(),
            seat_id: 3,
            seat_type: "vip".to_string(),
            base_price: dec!(90000),
            surcharge: dec!(20000),
            discount: dec!(5000),
            final_price: dec!(105000),
            status: status.to_string(),
            checked_in_at: None,
        }
    }

    #[test]
    fn test_booking_row_restores_stored_state() {
        let payment = r#"{
            "reference": "PAY-BK1-2-0f0e",
            "method": "credit_card",
            "amount": "302000",
            "status": "succeeded",
            "gateway_transaction_id": "tx-1",
            "failure_reason": null,
            "submitted_at": "2026-02-01T18:01:00Z",
            "resolved_at": "2026-02-01T18:02:00Z"
        }"#;
        let row = booking_row("confirmed", Some(payment));
        let id = row.booking_id;
        let updated_at = row.updated_at;
        let ticket = Ticket::try_from(ticket_row(id, "checked_in")).unwrap();

        let booking = row.into_booking(vec![ticket]).unwrap();

        assert_eq!(booking.id, id);
        assert_eq!(booking.booking_code, "BK202602011800001234");
        assert_eq!(booking.status(), BookingStatus::Confirmed);
        assert_eq!(booking.seat_ids, vec![3, 4]);
        assert_eq!(booking.payment_attempts, 2);
        assert_eq!(booking.updated_at, updated_at);
        assert!(booking.hold_id.is_none());

        let payment = booking.payment.unwrap();
        assert_eq!(payment.reference, "PAY-BK1-2-0f0e");
        assert_eq!(payment.amount, dec!(302000));

        assert_eq!(booking.tickets[0].ticket_code, "TK0A1B2C3D");
        assert_eq!(booking.tickets[0].status(), TicketStatus::CheckedIn);
        assert_eq!(booking.tickets[0].seat_type, SeatType::Vip);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(booking_row("archived", None).into_booking(Vec::new()).is_err());
        assert!(Ticket::try_from(ticket_row(Uuid::new_v4(), "lost")).is_err());
    }

    #[test]
    fn test_malformed_payment_is_rejected() {
        let row = booking_row("confirmed", Some("{\"reference\": 5}"));
        assert!(matches!(
            row.into_booking(Vec::new()),
            Err(AppError::Database(_))
        ));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_missing_booking_is_none() {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/cine_booking".to_string());
        let repo = PgBookingRepository::new(PgPool::connect(&url).await.unwrap());

        assert!(repo.find(Uuid::new_v4()).await.unwrap().is_none());
        assert!(repo.find_by_code("BKMISSING").await.unwrap().is_none());
        assert!(repo.sold_seats(-1).await.unwrap().is_empty());
    }
}
