//! Collaborator traits
//!
//! Abstractions over the systems the engine consumes but does not own:
//! reference data, the payment gateway, notifications, the points ledger,
//! durable redemptions and settled bookings.

use crate::error::AppError;
use crate::models::{
    Booking, BookingEvent, BookingId, ChargeAck, ChargeRequest, CustomerId, HallId, Membership,
    PointsTransaction, Promotion, Redemption, RefundAck, RefundRequest, Seat, SeatId, Showtime,
    ShowtimeId, SurchargeTable, Voucher,
};
use async_trait::async_trait;

/// Read-only reference data: showtimes, seats, promotions, memberships
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Find showtime by ID
    async fn find_showtime(&self, id: ShowtimeId) -> Result<Option<Showtime>, AppError>;

    /// All seats of a hall, ordered by ID
    async fn find_seats_by_hall(&self, hall_id: HallId) -> Result<Vec<Seat>, AppError>;

    /// Active surcharge per seat type
    async fn seat_surcharges(&self) -> Result<SurchargeTable, AppError>;

    /// Find promotion by redemption code
    async fn find_promotion_by_code(&self, code: &str) -> Result<Option<Promotion>, AppError>;

    /// Find promotion by ID
    async fn find_promotion(&self, id: i32) -> Result<Option<Promotion>, AppError>;

    /// Find voucher by code
    async fn find_voucher_by_code(&self, code: &str) -> Result<Option<Voucher>, AppError>;

    /// Membership and tier of a customer, if enrolled
    async fn find_membership(
        &self,
        customer_id: CustomerId,
    ) -> Result<Option<Membership>, AppError>;

    /// Redemptions of a promotion already made by a customer
    async fn count_customer_promotion_usage(
        &self,
        promotion_id: i32,
        customer_id: CustomerId,
    ) -> Result<i32, AppError>;
}

/// Payment processor
///
/// `charge` must treat `ChargeRequest::reference` as an idempotency key.
/// An `Err` is a transient transport failure; business outcomes travel in
/// `ChargeAck`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Submit a charge
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeAck, AppError>;

    /// Hand captured money back
    async fn refund(&self, request: &RefundRequest) -> Result<RefundAck, AppError>;
}

/// Fire-and-forget customer notifications
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, event: &BookingEvent) -> Result<(), AppError>;
}

/// Append-only loyalty points ledger
#[async_trait]
pub trait PointsLedger: Send + Sync {
    async fn append(&self, entry: &PointsTransaction) -> Result<(), AppError>;
}

/// Durable voucher and promotion usage
///
/// The voucher flip and the usage record commit together. Both calls are
/// idempotent per booking.
#[async_trait]
pub trait RedemptionStore: Send + Sync {
    /// Mark the voucher used by this booking and record the promotion use
    ///
    /// Fails with `VoucherUnavailable` when another booking holds the
    /// voucher; nothing is written in that case.
    async fn redeem(&self, redemption: &Redemption) -> Result<(), AppError>;

    /// Undo what `redeem` wrote for a booking that did not confirm
    async fn revoke(&self, booking_id: BookingId) -> Result<(), AppError>;
}

/// Storage of bookings that outlive their hold
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Insert or update a booking with its tickets
    ///
    /// An older snapshot (by `updated_at`) never overwrites a newer one.
    async fn save(&self, booking: &Booking) -> Result<(), AppError>;

    async fn find(&self, id: BookingId) -> Result<Option<Booking>, AppError>;

    async fn find_by_code(&self, booking_code: &str) -> Result<Option<Booking>, AppError>;

    /// Booking whose current payment attempt carries `reference`
    async fn find_by_payment_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Booking>, AppError>;

    /// Newest first
    async fn find_by_customer(&self, customer_id: CustomerId) -> Result<Vec<Booking>, AppError>;

    /// Seats occupied by confirmed or refunded bookings of a showtime
    async fn sold_seats(&self, showtime_id: ShowtimeId) -> Result<Vec<SeatId>, AppError>;
}
