//! Membership tier and loyalty points models

use super::booking::BookingId;
use super::showtime::CustomerId;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Membership tier configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MembershipTier {
    pub id: i32,
    pub tier_name: String,
    /// Ordering of tiers, higher is better
    pub tier_level: i32,
    /// Percent off the subtotal
    pub discount_percentage: Decimal,
    /// Multiplier applied to base points
    pub points_earn_rate: Decimal,
}

/// A customer's membership
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Membership {
    pub customer_id: CustomerId,
    pub tier: MembershipTier,
    pub available_points: i64,
}

/// Points transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointsTransactionType {
    Earn,
    Redeem,
    Expire,
}

impl fmt::Display for PointsTransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointsTransactionType::Earn => write!(f, "earn"),
            PointsTransactionType::Redeem => write!(f, "redeem"),
            PointsTransactionType::Expire => write!(f, "expire"),
        }
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointsTransaction {
    pub id: Uuid,
    pub customer_id: CustomerId,
    pub booking_id: Option<BookingId>,
    pub points: i64,
    pub transaction_type: PointsTransactionType,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Earned points lapse after a year
    pub expires_at: Option<DateTime<Utc>>,
}

impl PointsTransaction {
    /// Accrual for a confirmed booking
    pub fn earn(
        customer_id: CustomerId,
        booking_id: BookingId,
        booking_code: &str,
        points: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            booking_id: Some(booking_id),
            points,
            transaction_type: PointsTransactionType::Earn,
            description: format!("Earned from booking {}", booking_code),
            created_at: now,
            expires_at: Some(now + Duration::days(365)),
        }
    }
}
