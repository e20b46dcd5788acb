//! Promotion and voucher models
//!
//! Promotions are reference data owned by the catalog. Validity is checked
//! against an explicit evaluation instant so pricing stays deterministic.

use super::showtime::{CustomerId, SeatType, ShowtimeId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Promotion type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromotionType {
    /// Percentage of the subtotal
    #[default]
    Percentage,
    /// Fixed amount off
    FixedAmount,
}

impl PromotionType {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "percentage" => Some(PromotionType::Percentage),
            "fixed_amount" => Some(PromotionType::FixedAmount),
            _ => None,
        }
    }
}

/// Typed eligibility filter; empty fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApplicableTo {
    /// At least one booked seat must be of one of these types
    #[serde(default)]
    pub seat_types: Option<Vec<SeatType>>,

    /// Showtimes the promotion is valid for
    #[serde(default)]
    pub showtime_ids: Option<Vec<ShowtimeId>>,

    /// Minimum number of tickets in the booking
    #[serde(default)]
    pub min_tickets: Option<usize>,
}

impl ApplicableTo {
    pub fn matches(&self, showtime_id: ShowtimeId, seat_types: &[SeatType]) -> bool {
        if let Some(showtimes) = &self.showtime_ids {
            if !showtimes.contains(&showtime_id) {
                return false;
            }
        }
        if let Some(types) = &self.seat_types {
            if !seat_types.iter().any(|t| types.contains(t)) {
                return false;
            }
        }
        if let Some(min) = self.min_tickets {
            if seat_types.len() < min {
                return false;
            }
        }
        true
    }
}

/// Why a promotion or voucher was not applied
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromotionRejection {
    UnknownCode,
    Inactive,
    NotStarted,
    Expired,
    BelowMinimumPurchase { minimum: Decimal },
    UsageExhausted,
    PerUserLimitReached,
    NotApplicable,
    VoucherUsed,
    VoucherNotOwned,
}

impl fmt::Display for PromotionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromotionRejection::UnknownCode => write!(f, "unknown code"),
            PromotionRejection::Inactive => write!(f, "promotion is not active"),
            PromotionRejection::NotStarted => write!(f, "promotion has not started"),
            PromotionRejection::Expired => write!(f, "promotion has ended"),
            PromotionRejection::BelowMinimumPurchase { minimum } => {
                write!(f, "subtotal below minimum purchase of {}", minimum)
            }
            PromotionRejection::UsageExhausted => write!(f, "usage limit reached"),
            PromotionRejection::PerUserLimitReached => {
                write!(f, "per-customer usage limit reached")
            }
            PromotionRejection::NotApplicable => write!(f, "not applicable to this booking"),
            PromotionRejection::VoucherUsed => write!(f, "voucher already used"),
            PromotionRejection::VoucherNotOwned => write!(f, "voucher belongs to another customer"),
        }
    }
}

/// Promotion entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Promotion {
    pub id: i32,

    /// Redemption code
    pub code: String,

    pub name: String,

    /// Catalog label. The amount always comes from [`Promotion::discount_for`],
    /// whatever the type says.
    pub promotion_type: PromotionType,

    /// Percent off the subtotal (10 = 10%)
    pub discount_percentage: Option<Decimal>,

    /// Flat amount off
    pub discount_amount: Option<Decimal>,

    /// Subtotal required before the promotion applies
    pub min_purchase_amount: Option<Decimal>,

    /// Cap on the discount
    pub max_discount_amount: Option<Decimal>,

    /// Inclusive validity window
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,

    pub max_usage_total: Option<i32>,

    pub max_usage_per_user: Option<i32>,

    /// Redemptions so far
    pub current_usage: i32,

    pub is_active: bool,

    /// Sums with the membership discount instead of competing with it
    pub stackable: bool,

    #[serde(default)]
    pub applicable_to: ApplicableTo,
}

/// Facts about one pricing request needed to validate a promotion
#[derive(Debug, Clone, Copy)]
pub struct PromotionContext<'a> {
    pub subtotal: Decimal,
    pub showtime_id: ShowtimeId,
    pub seat_types: &'a [SeatType],
    /// Redemptions already made by this customer
    pub customer_usage: i32,
    pub at: DateTime<Utc>,
}

impl Promotion {
    /// Every eligibility rule, in a fixed order
    pub fn validate(&self, ctx: &PromotionContext<'_>) -> Result<(), PromotionRejection> {
        if !self.is_active {
            return Err(PromotionRejection::Inactive);
        }
        if ctx.at < self.start_date {
            return Err(PromotionRejection::NotStarted);
        }
        if ctx.at > self.end_date {
            return Err(PromotionRejection::Expired);
        }
        if let Some(minimum) = self.min_purchase_amount {
            if ctx.subtotal < minimum {
                return Err(PromotionRejection::BelowMinimumPurchase { minimum });
            }
        }
        if let Some(max) = self.max_usage_total {
            if self.current_usage >= max {
                return Err(PromotionRejection::UsageExhausted);
            }
        }
        if let Some(max) = self.max_usage_per_user {
            if ctx.customer_usage >= max {
                return Err(PromotionRejection::PerUserLimitReached);
            }
        }
        if !self.applicable_to.matches(ctx.showtime_id, ctx.seat_types) {
            return Err(PromotionRejection::NotApplicable);
        }
        Ok(())
    }

    /// max(flat, subtotal x pct), capped by `max_discount_amount` and the subtotal
    ///
    /// `promotion_type` plays no part here. A promotion with both fields set
    /// grants the larger of the two regardless of its label.
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        let flat = self.discount_amount.unwrap_or(Decimal::ZERO);
        let pct = self
            .discount_percentage
            .map(|p| subtotal * p / Decimal::ONE_HUNDRED)
            .unwrap_or(Decimal::ZERO);

        let mut discount = flat.max(pct);
        if let Some(cap) = self.max_discount_amount {
            discount = discount.min(cap);
        }
        discount.min(subtotal).max(Decimal::ZERO)
    }
}

/// Voucher status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VoucherStatus {
    #[default]
    Available,
    Used,
    Expired,
    Cancelled,
}

impl VoucherStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "available" => Some(VoucherStatus::Available),
            "used" => Some(VoucherStatus::Used),
            "expired" => Some(VoucherStatus::Expired),
            "cancelled" => Some(VoucherStatus::Cancelled),
            _ => None,
        }
    }
}

/// Single-use code bound to a promotion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Voucher {
    pub id: i32,
    pub code: String,
    pub promotion_id: i32,
    /// Owning customer; `None` means bearer voucher
    pub customer_id: Option<CustomerId>,
    pub status: VoucherStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Voucher {
    /// Redeemable by `customer_id` at `at`
    pub fn check(&self, customer_id: CustomerId, at: DateTime<Utc>) -> Result<(), PromotionRejection> {
        match self.status {
            VoucherStatus::Available => {}
            VoucherStatus::Used => return Err(PromotionRejection::VoucherUsed),
            VoucherStatus::Expired => return Err(PromotionRejection::Expired),
            VoucherStatus::Cancelled => return Err(PromotionRejection::Inactive),
        }
        if self.expires_at.map_or(false, |deadline| at > deadline) {
            return Err(PromotionRejection::Expired);
        }
        if self.customer_id.map_or(false, |owner| owner != customer_id) {
            return Err(PromotionRejection::VoucherNotOwned);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn promotion() -> Promotion {
        let now = Utc::now();
        Promotion {
            id: 1,
            code: "SPRING10".to_string(),
            name: "Spring sale".to_string(),
            promotion_type: PromotionType::Percentage,
            discount_percentage: Some(dec!(10)),
            discount_amount: None,
            min_purchase_amount: Some(dec!(100000)),
            max_discount_amount: Some(dec!(50000)),
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            max_usage_total: Some(100),
            max_usage_per_user: Some(1),
            current_usage: 0,
            is_active: true,
            stackable: false,
            applicable_to: ApplicableTo::default(),
        }
    }

    fn ctx(subtotal: Decimal, seat_types: &[SeatType]) -> PromotionContext<'_> {
        PromotionContext {
            subtotal,
            showtime_id: 1,
            seat_types,
            customer_usage: 0,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_discount_capped() {
        let promo = promotion();
        assert_eq!(promo.discount_for(dec!(200000)), dec!(20000));
        assert_eq!(promo.discount_for(dec!(900000)), dec!(50000));
    }

    #[test]
    fn test_flat_vs_percentage_takes_max() {
        let mut promo = promotion();
        promo.discount_amount = Some(dec!(30000));
        assert_eq!(promo.discount_for(dec!(200000)), dec!(30000));
        assert_eq!(promo.discount_for(dec!(400000)), dec!(40000));
        // Never more than the subtotal
        promo.max_discount_amount = None;
        assert_eq!(promo.discount_for(dec!(20000)), dec!(20000));
    }

    #[test]
    fn test_promotion_type_does_not_pick_the_formula() {
        let mut fixed = promotion();
        fixed.promotion_type = PromotionType::FixedAmount;
        fixed.discount_amount = Some(dec!(5000));
        fixed.max_discount_amount = None;

        let mut percent = fixed.clone();
        percent.promotion_type = PromotionType::Percentage;

        // 10% of 200000 beats the flat 5000 under either label
        assert_eq!(fixed.discount_for(dec!(200000)), dec!(20000));
        assert_eq!(percent.discount_for(dec!(200000)), dec!(20000));
        // and the flat amount wins on a small subtotal
        assert_eq!(fixed.discount_for(dec!(30000)), dec!(5000));
        assert_eq!(percent.discount_for(dec!(30000)), dec!(5000));
    }

    #[test]
    fn test_validate_rules() {
        let types = [SeatType::Standard];
        let mut promo = promotion();
        assert!(promo.validate(&ctx(dec!(150000), &types)).is_ok());

        assert_eq!(
            promo.validate(&ctx(dec!(50000), &types)),
            Err(PromotionRejection::BelowMinimumPurchase {
                minimum: dec!(100000)
            })
        );

        promo.current_usage = 100;
        assert_eq!(
            promo.validate(&ctx(dec!(150000), &types)),
            Err(PromotionRejection::UsageExhausted)
        );

        promo.current_usage = 0;
        let mut used = ctx(dec!(150000), &types);
        used.customer_usage = 1;
        assert_eq!(
            promo.validate(&used),
            Err(PromotionRejection::PerUserLimitReached)
        );

        promo.end_date = Utc::now() - Duration::hours(1);
        assert_eq!(
            promo.validate(&ctx(dec!(150000), &types)),
            Err(PromotionRejection::Expired)
        );
    }

    #[test]
    fn test_applicable_to_seat_types() {
        let mut promo = promotion();
        promo.applicable_to.seat_types = Some(vec![SeatType::Vip]);

        assert_eq!(
            promo.validate(&ctx(dec!(150000), &[SeatType::Standard])),
            Err(PromotionRejection::NotApplicable)
        );
        assert!(promo
            .validate(&ctx(dec!(150000), &[SeatType::Standard, SeatType::Vip]))
            .is_ok());
    }

    #[test]
    fn test_voucher_check() {
        let now = Utc::now();
        let mut voucher = Voucher {
            id: 1,
            code: "VC-001".to_string(),
            promotion_id: 1,
            customer_id: Some(42),
            status: VoucherStatus::Available,
            expires_at: Some(now + Duration::days(30)),
        };
        assert!(voucher.check(42, now).is_ok());
        assert_eq!(
            voucher.check(7, now),
            Err(PromotionRejection::VoucherNotOwned)
        );

        voucher.status = VoucherStatus::Used;
        assert_eq!(voucher.check(42, now), Err(PromotionRejection::VoucherUsed));
    }
}
