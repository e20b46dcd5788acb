//! Pricing engine
//!
//! Pure computation of a `PriceBreakdown` from a snapshot of reference data.
//! The engine never reads the clock or the catalog itself; everything it
//! depends on is passed in, so equal inputs always give equal outputs.
//!
//! Order of operations:
//! 1. ticket = base price + seat-type surcharge
//! 2. subtotal = sum of tickets
//! 3. discount = promotion vs membership (max, or sum when stackable)
//! 4. tax on (subtotal - discount)
//! 5. service fee
//! 6. total, rounded half-up to the currency's minor unit

use cine_core::{
    config::{PricingConfig, PromotionFailurePolicy, ServiceFeeConfig},
    models::{
        DiscountSource, MembershipTier, PriceBreakdown, Promotion, PromotionContext,
        PromotionRejection, Seat, SeatType, ShowtimeId, SurchargeTable, TicketPrice,
    },
    AppError, AppResult,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

/// Intermediate amounts keep at least this many decimal places
const MIN_INTERMEDIATE_DP: u32 = 2;

/// Promotion attached to a pricing request
#[derive(Debug, Clone, Copy)]
pub enum PromotionClaim<'a> {
    None,
    /// Code resolved to a promotion; eligibility still to be checked
    Resolved {
        code: &'a str,
        promotion: &'a Promotion,
        customer_usage: i32,
    },
    /// Code already failed upstream (unknown code, voucher used, ...)
    Rejected {
        code: &'a str,
        reason: PromotionRejection,
    },
}

/// Everything one evaluation depends on
#[derive(Debug, Clone, Copy)]
pub struct PricingInput<'a> {
    pub showtime_id: ShowtimeId,
    pub base_price: Decimal,
    pub seats: &'a [Seat],
    pub surcharges: &'a SurchargeTable,
    pub promotion: PromotionClaim<'a>,
    pub tier: Option<&'a MembershipTier>,
    pub evaluated_at: DateTime<Utc>,
}

/// Pricing engine
#[derive(Debug, Clone)]
pub struct PricingEngine {
    config: PricingConfig,
    currency: String,
    minor_units: u32,
}

impl PricingEngine {
    pub fn new(config: PricingConfig, currency: impl Into<String>, minor_units: u32) -> Self {
        Self {
            config,
            currency: currency.into(),
            minor_units,
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    fn intermediate_dp(&self) -> u32 {
        self.minor_units.max(MIN_INTERMEDIATE_DP)
    }

    fn round_intermediate(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.intermediate_dp(), RoundingStrategy::MidpointAwayFromZero)
    }

    fn round_final(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.minor_units, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Price a set of seats
    ///
    /// # Errors
    ///
    /// - `InvalidInput` when no seats are given
    /// - `InvalidPromotion` when a promotion fails validation and the policy
    ///   is `Reject`
    pub fn price(&self, input: &PricingInput<'_>) -> AppResult<PriceBreakdown> {
        if input.seats.is_empty() {
            return Err(AppError::InvalidInput("no seats to price".to_string()));
        }

        let mut tickets: Vec<TicketPrice> = input
            .seats
            .iter()
            .map(|seat| {
                let surcharge = input
                    .surcharges
                    .get(&seat.seat_type)
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                TicketPrice {
                    seat_id: seat.id,
                    seat_type: seat.seat_type,
                    base_price: input.base_price,
                    surcharge,
                    discount: Decimal::ZERO,
                    final_price: input.base_price + surcharge,
                }
            })
            .collect();
        let subtotal: Decimal = tickets.iter().map(|t| t.final_price).sum();
        let seat_types: Vec<SeatType> = input.seats.iter().map(|s| s.seat_type).collect();

        let (promotion_discount, promotion_code, stackable, promotion_rejection) =
            self.promotion_discount(input, subtotal, &seat_types)?;

        let tier_discount = input
            .tier
            .map(|tier| {
                self.round_intermediate(subtotal * tier.discount_percentage / Decimal::ONE_HUNDRED)
            })
            .unwrap_or(Decimal::ZERO);

        let (discount_amount, discount_source) = match (promotion_code, input.tier) {
            (Some(code), Some(tier)) if tier_discount > Decimal::ZERO => {
                if stackable {
                    (
                        (promotion_discount + tier_discount).min(subtotal),
                        DiscountSource::Stacked {
                            code,
                            tier_name: tier.tier_name.clone(),
                        },
                    )
                } else if promotion_discount >= tier_discount {
                    (promotion_discount, DiscountSource::Promotion { code })
                } else {
                    (
                        tier_discount,
                        DiscountSource::Membership {
                            tier_name: tier.tier_name.clone(),
                        },
                    )
                }
            }
            (Some(code), _) => (promotion_discount, DiscountSource::Promotion { code }),
            (None, Some(tier)) if tier_discount > Decimal::ZERO => (
                tier_discount,
                DiscountSource::Membership {
                    tier_name: tier.tier_name.clone(),
                },
            ),
            _ => (Decimal::ZERO, DiscountSource::None),
        };

        self.allocate_discount(&mut tickets, subtotal, discount_amount);

        let taxable = subtotal - discount_amount;
        let tax_amount =
            self.round_intermediate(taxable * self.config.tax_percent / Decimal::ONE_HUNDRED);
        let service_fee = self.round_intermediate(self.service_fee(subtotal, tickets.len()));
        let total_amount = self.round_final(taxable + tax_amount + service_fee);

        debug!(
            "Priced {} seats: subtotal={}, discount={}, tax={}, fee={}, total={}",
            tickets.len(),
            subtotal,
            discount_amount,
            tax_amount,
            service_fee,
            total_amount
        );

        Ok(PriceBreakdown {
            tickets,
            subtotal,
            discount_amount,
            discount_source,
            tax_amount,
            service_fee,
            total_amount,
            currency: self.currency.clone(),
            evaluated_at: input.evaluated_at,
            promotion_rejection,
        })
    }

    /// (discount, applied code, stackable, rejection reported under the
    /// continue policy)
    fn promotion_discount(
        &self,
        input: &PricingInput<'_>,
        subtotal: Decimal,
        seat_types: &[SeatType],
    ) -> AppResult<(Decimal, Option<String>, bool, Option<PromotionRejection>)> {
        let (code, rejection) = match input.promotion {
            PromotionClaim::None => return Ok((Decimal::ZERO, None, false, None)),
            PromotionClaim::Resolved {
                code,
                promotion,
                customer_usage,
            } => {
                let ctx = PromotionContext {
                    subtotal,
                    showtime_id: input.showtime_id,
                    seat_types,
                    customer_usage,
                    at: input.evaluated_at,
                };
                match promotion.validate(&ctx) {
                    Ok(()) => {
                        let discount = self.round_intermediate(promotion.discount_for(subtotal));
                        return Ok((
                            discount,
                            Some(code.to_string()),
                            promotion.stackable,
                            None,
                        ));
                    }
                    Err(reason) => (code, reason),
                }
            }
            PromotionClaim::Rejected { code, reason } => (code, reason),
        };

        match self.config.promotion_policy {
            PromotionFailurePolicy::Reject => Err(AppError::InvalidPromotion {
                code: code.to_string(),
                reason: rejection,
            }),
            PromotionFailurePolicy::ContinueWithoutDiscount => {
                Ok((Decimal::ZERO, None, false, Some(rejection)))
            }
        }
    }

    fn service_fee(&self, subtotal: Decimal, ticket_count: usize) -> Decimal {
        match &self.config.service_fee {
            ServiceFeeConfig::Flat { amount } => *amount,
            ServiceFeeConfig::PerTicket { amount } => *amount * Decimal::from(ticket_count),
            ServiceFeeConfig::Tiered { tiers } => tiers
                .iter()
                .filter(|tier| subtotal >= tier.min_subtotal)
                .max_by(|a, b| a.min_subtotal.cmp(&b.min_subtotal))
                .map(|tier| tier.amount)
                .unwrap_or(Decimal::ZERO),
        }
    }

    /// Spread the discount over tickets in proportion to their price
    ///
    /// Shares are rounded down, so they never overshoot the discount. The
    /// remainder goes to the last ticket, spilling backwards when a ticket
    /// would drop below zero. Every share ends up in `[0, price]`.
    fn allocate_discount(&self, tickets: &mut [TicketPrice], subtotal: Decimal, discount: Decimal) {
        if discount.is_zero() || subtotal.is_zero() {
            return;
        }

        let mut remaining = discount;
        for ticket in tickets.iter_mut() {
            let share = (discount * ticket.final_price / subtotal)
                .round_dp_with_strategy(self.intermediate_dp(), RoundingStrategy::ToZero)
                .min(remaining)
                .min(ticket.final_price)
                .max(Decimal::ZERO);
            remaining -= share;
            ticket.discount = share;
            ticket.final_price -= share;
        }

        for ticket in tickets.iter_mut().rev() {
            if remaining <= Decimal::ZERO {
                break;
            }
            let extra = remaining.min(ticket.final_price);
            ticket.discount += extra;
            ticket.final_price -= extra;
            remaining -= extra;
        }
    }

    /// Loyalty points for a paid total: floor(total / rate) x earn rate, floored
    pub fn points_earned(
        total: Decimal,
        conversion_rate: Decimal,
        tier: Option<&MembershipTier>,
    ) -> i64 {
        if conversion_rate <= Decimal::ZERO || total <= Decimal::ZERO {
            return 0;
        }
        let base = (total / conversion_rate).floor();
        let rate = tier.map(|t| t.points_earn_rate).unwrap_or(Decimal::ONE);
        (base * rate).floor().to_i64().unwrap_or(0)
    }
}
