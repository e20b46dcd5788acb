//! Booking DTOs
//!
//! Request and response types for the checkout endpoints.

use chrono::{DateTime, Utc};
use cine_core::models::{
    Booking, BookingStatus, CustomerId, PaymentMethod, PaymentOutcome, PaymentStatus,
    PriceBreakdown, SeatId, ShowtimeId, Ticket, TicketStatus,
};
use cine_services::{PaymentSubmission, SeatMap, StartedBooking};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Start a booking by holding seats
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateBookingRequest {
    /// Showtime to book
    #[validate(range(min = 1, message = "Showtime id must be positive"))]
    pub showtime_id: ShowtimeId,

    /// Seats to hold
    #[validate(length(min = 1, max = 20, message = "Between 1 and 20 seats per booking"))]
    pub seat_ids: Vec<SeatId>,

    /// Customer placing the booking
    #[validate(range(min = 1, message = "Customer id must be positive"))]
    pub customer_id: CustomerId,
}

/// Price the held seats; at most one code may be supplied
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct PricingRequest {
    #[validate(length(min = 1, max = 50))]
    pub promotion_code: Option<String>,

    #[validate(length(min = 1, max = 50))]
    pub voucher_code: Option<String>,
}

/// Submit payment for a priced booking
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PaymentRequest {
    pub method: PaymentMethod,

    /// Total the client displayed; rejected when it differs from the frozen quote
    pub quoted_total: Option<Decimal>,
}

/// Extend the hold of a booking
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExtendHoldRequest {
    /// Seconds to add to the current deadline
    #[validate(range(min = 1, max = 900, message = "Extension must be 1 to 900 seconds"))]
    pub extra_secs: i64,
}

/// Admit a ticket at the door
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckInRequest {
    #[validate(length(min = 3, max = 20, message = "Ticket code is required"))]
    pub ticket_code: String,
}

/// Query for a customer's bookings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CustomerBookingsQuery {
    #[validate(range(min = 1, message = "Customer id must be positive"))]
    pub customer_id: CustomerId,
}

/// Gateway webhook body
///
/// ```json
/// { "reference": "PAY-BK...-1-9f3c...", "status": "succeeded",
///   "gateway_transaction_id": "tx-1", "amount": "302000" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PaymentCallbackRequest {
    #[validate(length(min = 1, max = 100, message = "Payment reference is required"))]
    pub reference: String,

    #[serde(flatten)]
    pub outcome: PaymentOutcome,
}

/// Returned when seats were held
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedBookingResponse {
    pub booking_id: Uuid,
    pub booking_code: String,
    pub seat_ids: Vec<SeatId>,
    pub hold_expires_at: DateTime<Utc>,
}

impl From<StartedBooking> for CreatedBookingResponse {
    fn from(started: StartedBooking) -> Self {
        Self {
            booking_id: started.booking_id,
            booking_code: started.booking_code,
            seat_ids: started.seat_ids,
            hold_expires_at: started.hold_expires_at,
        }
    }
}

/// Ticket as shown to the customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketResponse {
    pub ticket_code: String,
    pub seat_id: SeatId,
    pub final_price: Decimal,
    pub status: TicketStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_in_at: Option<DateTime<Utc>>,
}

impl From<&Ticket> for TicketResponse {
    fn from(ticket: &Ticket) -> Self {
        Self {
            ticket_code: ticket.ticket_code.clone(),
            seat_id: ticket.seat_id,
            final_price: ticket.final_price,
            status: ticket.status(),
            checked_in_at: ticket.checked_in_at,
        }
    }
}

/// Booking view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingResponse {
    pub booking_id: Uuid,
    pub booking_code: String,
    pub showtime_id: ShowtimeId,
    pub customer_id: CustomerId,
    pub seat_ids: Vec<SeatId>,
    pub status: BookingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_reference: Option<String>,
    pub tickets: Vec<TicketResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        let total_amount = booking.total_amount();
        let status = booking.status();
        Self {
            booking_id: booking.id,
            booking_code: booking.booking_code,
            showtime_id: booking.showtime_id,
            customer_id: booking.customer_id,
            seat_ids: booking.seat_ids,
            status,
            // Deadline is meaningless once the hold is gone
            hold_expires_at: if status.is_pre_confirmed() {
                booking.hold_expires_at
            } else {
                None
            },
            total_amount,
            payment_reference: booking.payment.as_ref().map(|p| p.reference.clone()),
            payment_status: booking.payment.as_ref().map(|p| p.status),
            paid_at: booking.paid_at,
            refund_reference: booking.refund_reference,
            tickets: booking.tickets.iter().map(TicketResponse::from).collect(),
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}

/// Outcome of a payment submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSubmissionResponse {
    pub booking_id: Uuid,
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub booking_status: BookingStatus,
}

impl From<PaymentSubmission> for PaymentSubmissionResponse {
    fn from(submission: PaymentSubmission) -> Self {
        Self {
            booking_id: submission.booking_id,
            reference: submission.reference,
            amount: submission.amount,
            currency: submission.currency,
            payment_status: submission.payment_status,
            booking_status: submission.booking_status,
        }
    }
}

/// Price quote
pub type PricingResponse = PriceBreakdown;

/// Seat map of a showtime
#[derive(Debug, Clone, Serialize)]
pub struct SeatMapResponse {
    pub showtime_id: ShowtimeId,
    pub available_seats: usize,
    pub seats: Vec<cine_core::models::SeatAvailability>,
}

impl From<SeatMap> for SeatMapResponse {
    fn from(map: SeatMap) -> Self {
        Self {
            showtime_id: map.showtime_id,
            available_seats: map.available,
            seats: map.seats,
        }
    }
}
