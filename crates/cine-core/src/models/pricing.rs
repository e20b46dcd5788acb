//! Price breakdown models
//!
//! Output of the pricing engine. Two evaluations with the same inputs compare
//! equal, which is what makes a frozen quote verifiable at payment time.

use super::booking::BookingId;
use super::promotion::PromotionRejection;
use super::showtime::{CustomerId, SeatId, SeatType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Price line of one ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketPrice {
    pub seat_id: SeatId,
    pub seat_type: SeatType,
    pub base_price: Decimal,
    pub surcharge: Decimal,
    pub discount: Decimal,
    pub final_price: Decimal,
}

/// Where the discount came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DiscountSource {
    #[default]
    None,
    Promotion { code: String },
    Membership { tier_name: String },
    Stacked { code: String, tier_name: String },
}

/// Full pricing result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub tickets: Vec<TicketPrice>,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub discount_source: DiscountSource,
    pub tax_amount: Decimal,
    pub service_fee: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    /// Instant the promotion windows were evaluated against
    pub evaluated_at: DateTime<Utc>,
    /// Set when a promotion was requested but skipped
    pub promotion_rejection: Option<PromotionRejection>,
}

/// Breakdown frozen on a booking plus the redemption it depends on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    pub breakdown: PriceBreakdown,
    /// Promotion whose usage counter is bumped on confirmation
    pub promotion_id: Option<i32>,
    pub promotion_code: Option<String>,
    /// Voucher claimed on confirmation
    pub voucher_code: Option<String>,
}

/// Promotion and voucher use made durable when a booking is confirmed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Redemption {
    pub booking_id: BookingId,
    pub customer_id: CustomerId,
    pub promotion_id: Option<i32>,
    pub voucher_code: Option<String>,
    pub discount_amount: Decimal,
    pub redeemed_at: DateTime<Utc>,
}

impl Redemption {
    /// What confirming `snapshot` consumes, if anything
    pub fn for_snapshot(
        snapshot: &PricingSnapshot,
        booking_id: BookingId,
        customer_id: CustomerId,
        at: DateTime<Utc>,
    ) -> Option<Self> {
        if snapshot.promotion_id.is_none() && snapshot.voucher_code.is_none() {
            return None;
        }
        Some(Self {
            booking_id,
            customer_id,
            promotion_id: snapshot.promotion_id,
            voucher_code: snapshot.voucher_code.clone(),
            discount_amount: snapshot.breakdown.discount_amount,
            redeemed_at: at,
        })
    }
}
