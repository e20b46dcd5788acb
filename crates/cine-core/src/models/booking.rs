//! Booking model and its state machine
//!
//! The booking status is private; every change goes through
//! `Booking::transition_to`, which consults the transition table below.
//!
//! ```text
//! Draft -> Holding -> Priced -> AwaitingPayment -> Confirmed -> Refunded
//!            |          | ^            |  |
//!            |          | +-(declined)-+  |
//!            v          v                 v
//!        Cancelled / Expired   (from any pre-confirmed state)
//! ```

use super::hold::HoldId;
use super::payment::PaymentAttempt;
use super::pricing::PricingSnapshot;
use super::showtime::{CustomerId, SeatId, ShowtimeId};
use super::ticket::Ticket;
use crate::error::AppError;
use crate::AppResult;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type BookingId = Uuid;

/// Booking status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Created, seats not yet held
    #[default]
    Draft,
    /// Seats held, not yet priced
    Holding,
    /// Price frozen, waiting for the customer to pay
    Priced,
    /// Charge submitted to the gateway
    AwaitingPayment,
    /// Paid; seats permanently occupied
    Confirmed,
    /// Abandoned before confirmation
    Cancelled,
    /// Hold deadline passed before confirmation
    Expired,
    /// Refunded after confirmation
    Refunded,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStatus::Draft => write!(f, "draft"),
            BookingStatus::Holding => write!(f, "holding"),
            BookingStatus::Priced => write!(f, "priced"),
            BookingStatus::AwaitingPayment => write!(f, "awaiting_payment"),
            BookingStatus::Confirmed => write!(f, "confirmed"),
            BookingStatus::Cancelled => write!(f, "cancelled"),
            BookingStatus::Expired => write!(f, "expired"),
            BookingStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl BookingStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(BookingStatus::Draft),
            "holding" => Some(BookingStatus::Holding),
            "priced" => Some(BookingStatus::Priced),
            "awaiting_payment" => Some(BookingStatus::AwaitingPayment),
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "expired" => Some(BookingStatus::Expired),
            "refunded" => Some(BookingStatus::Refunded),
            _ => None,
        }
    }

    /// Transition table
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Draft, Holding)
                | (Draft, Cancelled)
                | (Holding, Priced)
                | (Holding, Cancelled)
                | (Holding, Expired)
                // re-quote with a different promotion
                | (Priced, Priced)
                | (Priced, AwaitingPayment)
                | (Priced, Cancelled)
                | (Priced, Expired)
                // retry after a transient gateway failure
                | (AwaitingPayment, AwaitingPayment)
                | (AwaitingPayment, Confirmed)
                | (AwaitingPayment, Priced)
                | (AwaitingPayment, Cancelled)
                | (AwaitingPayment, Expired)
                | (Confirmed, Refunded)
        )
    }

    /// Seats are held on behalf of this booking
    pub fn is_pre_confirmed(&self) -> bool {
        matches!(
            self,
            BookingStatus::Holding | BookingStatus::Priced | BookingStatus::AwaitingPayment
        )
    }

    /// Check if booking is finalized
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            BookingStatus::Cancelled | BookingStatus::Expired | BookingStatus::Refunded
        )
    }
}

/// Booking entity
#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    /// Unique identifier
    pub id: BookingId,

    /// Customer-facing code, `BK` + timestamp + 4 digits
    pub booking_code: String,

    pub showtime_id: ShowtimeId,

    pub customer_id: CustomerId,

    /// Booked seats, ascending
    pub seat_ids: Vec<SeatId>,

    /// Hold backing the booking until confirmation
    pub hold_id: Option<HoldId>,

    status: BookingStatus,

    /// Mirror of the hold deadline
    pub hold_expires_at: Option<DateTime<Utc>>,

    /// Price frozen by the last successful pricing call
    pub pricing: Option<PricingSnapshot>,

    /// Current payment attempt
    pub payment: Option<PaymentAttempt>,

    /// Number of charges submitted
    pub payment_attempts: u32,

    /// Issued on confirmation
    pub tickets: Vec<Ticket>,

    pub paid_at: Option<DateTime<Utc>>,

    pub closed_at: Option<DateTime<Utc>>,

    /// Gateway reference of the refund, once requested
    pub refund_reference: Option<String>,

    /// Set while a refund request is in flight
    #[serde(skip)]
    pub refund_in_flight: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Create a draft booking
    pub fn draft(
        id: BookingId,
        showtime_id: ShowtimeId,
        customer_id: CustomerId,
        mut seat_ids: Vec<SeatId>,
        now: DateTime<Utc>,
    ) -> Self {
        seat_ids.sort_unstable();
        seat_ids.dedup();
        Self {
            id,
            booking_code: Self::generate_code(now),
            showtime_id,
            customer_id,
            seat_ids,
            hold_id: None,
            status: BookingStatus::Draft,
            hold_expires_at: None,
            pricing: None,
            payment: None,
            payment_attempts: 0,
            tickets: Vec::new(),
            paid_at: None,
            closed_at: None,
            refund_reference: None,
            refund_in_flight: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// `BK` + yyyyMMddHHmmss + 4 digits
    pub fn generate_code(now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().as_u128() % 10_000;
        format!("BK{}{:04}", now.format("%Y%m%d%H%M%S"), suffix)
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    /// Set the status of a booking loaded from storage
    ///
    /// Bypasses the transition table; the stored status was reached through
    /// it already.
    pub fn restore_status(&mut self, status: BookingStatus) {
        self.status = status;
    }

    /// Settled bookings outlive their hold and are kept in storage
    pub fn is_settled(&self) -> bool {
        self.status == BookingStatus::Confirmed || self.status.is_final()
    }

    /// Move to `next` if the transition table allows it
    pub fn transition_to(&mut self, next: BookingStatus, now: DateTime<Utc>) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        if next.is_final() {
            self.closed_at = Some(now);
        }
        Ok(())
    }

    /// Expected-state check used before any mutation
    pub fn expect_status(&self, expected: &[BookingStatus], next: BookingStatus) -> AppResult<()> {
        if expected.contains(&self.status) && self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(AppError::InvalidTransition {
                from: self.status,
                to: next,
            })
        }
    }

    /// Frozen total, if priced
    pub fn total_amount(&self) -> Option<Decimal> {
        self.pricing.as_ref().map(|p| p.breakdown.total_amount)
    }

    /// Hold deadline passed
    pub fn hold_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.hold_expires_at.map_or(false, |deadline| now > deadline)
    }
}

/// Events handed to the notification dispatcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BookingEvent {
    Confirmed {
        booking_id: BookingId,
        booking_code: String,
        customer_id: CustomerId,
        showtime_id: ShowtimeId,
        ticket_codes: Vec<String>,
        total_amount: Decimal,
    },
    PaymentFailed {
        booking_id: BookingId,
        customer_id: CustomerId,
        reason: String,
    },
    Expired {
        booking_id: BookingId,
        customer_id: CustomerId,
    },
    Cancelled {
        booking_id: BookingId,
        customer_id: CustomerId,
    },
    Refunded {
        booking_id: BookingId,
        customer_id: CustomerId,
        amount: Decimal,
    },
}

impl BookingEvent {
    pub fn booking_id(&self) -> BookingId {
        match self {
            BookingEvent::Confirmed { booking_id, .. }
            | BookingEvent::PaymentFailed { booking_id, .. }
            | BookingEvent::Expired { booking_id, .. }
            | BookingEvent::Cancelled { booking_id, .. }
            | BookingEvent::Refunded { booking_id, .. } => *booking_id,
        }
    }
}
