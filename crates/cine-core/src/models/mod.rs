//! Domain models for the booking engine
//!
//! This module contains all the core domain models used throughout the application.

pub mod booking;
pub mod hold;
pub mod membership;
pub mod payment;
pub mod pricing;
pub mod promotion;
pub mod showtime;
pub mod ticket;

pub use booking::{Booking, BookingEvent, BookingId, BookingStatus};
pub use hold::{HoldId, HoldStatus, SeatHold};
pub use membership::{Membership, MembershipTier, PointsTransaction, PointsTransactionType};
pub use payment::{
    ChargeAck, ChargeRequest, PaymentAttempt, PaymentMethod, PaymentOutcome, PaymentStatus,
    RefundAck, RefundReason, RefundRequest,
};
pub use pricing::{DiscountSource, PriceBreakdown, PricingSnapshot, Redemption, TicketPrice};
pub use promotion::{
    ApplicableTo, Promotion, PromotionContext, PromotionRejection, PromotionType, Voucher,
    VoucherStatus,
};
pub use showtime::{
    CustomerId, HallId, Seat, SeatAvailability, SeatId, SeatState, SeatType, Showtime,
    ShowtimeId, ShowtimeStatus, SurchargeTable,
};
pub use ticket::{Ticket, TicketStatus};
