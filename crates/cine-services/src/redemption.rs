//! Redemption ledger
//!
//! Voucher claims and promotion usage made by this engine. Both are written
//! only from inside the confirmation commit, so a voucher moves from
//! available to used exactly once no matter how many bookings race for it.

use chrono::{DateTime, Utc};
use cine_core::{
    models::{BookingId, CustomerId, PricingSnapshot},
    AppError, AppResult,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{info, warn};

/// Who used a voucher and when
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoucherClaim {
    pub booking_id: BookingId,
    pub used_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PromotionUsage {
    total: i32,
    per_customer: HashMap<CustomerId, i32>,
}

#[derive(Debug, Default)]
struct Ledger {
    vouchers: HashMap<String, VoucherClaim>,
    promotions: HashMap<i32, PromotionUsage>,
}

/// In-process redemption state
#[derive(Debug, Default)]
pub struct RedemptionLedger {
    inner: Mutex<Ledger>,
}

impl RedemptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Booking that already used the voucher, if any
    pub fn voucher_claim(&self, code: &str) -> Option<VoucherClaim> {
        self.inner.lock().vouchers.get(code).copied()
    }

    /// Redemptions of a promotion made through this engine
    pub fn promotion_usage(&self, promotion_id: i32) -> i32 {
        self.inner
            .lock()
            .promotions
            .get(&promotion_id)
            .map_or(0, |u| u.total)
    }

    /// Redemptions of a promotion by one customer made through this engine
    pub fn customer_usage(&self, promotion_id: i32, customer_id: CustomerId) -> i32 {
        self.inner
            .lock()
            .promotions
            .get(&promotion_id)
            .and_then(|u| u.per_customer.get(&customer_id).copied())
            .unwrap_or(0)
    }

    /// Apply the redemptions a frozen price depends on
    ///
    /// Claims the voucher (if any) and bumps the promotion counters. Claiming
    /// a voucher twice for the same booking is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `VoucherUnavailable` if another booking already used the
    /// voucher. Nothing is recorded in that case.
    pub fn redeem(
        &self,
        snapshot: &PricingSnapshot,
        booking_id: BookingId,
        customer_id: CustomerId,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut ledger = self.inner.lock();

        if let Some(code) = &snapshot.voucher_code {
            match ledger.vouchers.get(code) {
                Some(claim) if claim.booking_id == booking_id => return Ok(()),
                Some(claim) => {
                    warn!(
                        "Voucher {} already used by booking {}, rejecting booking {}",
                        code, claim.booking_id, booking_id
                    );
                    return Err(AppError::VoucherUnavailable(code.clone()));
                }
                None => {}
            }
            ledger.vouchers.insert(
                code.clone(),
                VoucherClaim {
                    booking_id,
                    used_at: now,
                },
            );
            info!("Voucher {} used by booking {}", code, booking_id);
        }

        if let Some(promotion_id) = snapshot.promotion_id {
            let usage = ledger.promotions.entry(promotion_id).or_default();
            usage.total += 1;
            *usage.per_customer.entry(customer_id).or_insert(0) += 1;
        }

        Ok(())
    }
}
