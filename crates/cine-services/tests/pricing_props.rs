//! Property tests for the pricing engine

use chrono::{Duration, TimeZone, Utc};
use cine_core::{
    config::{PricingConfig, PromotionFailurePolicy, ServiceFeeConfig},
    models::{ApplicableTo, Promotion, PromotionType, Seat, SeatType, SurchargeTable},
};
use cine_services::{PricingEngine, PricingInput, PromotionClaim};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn seat_type(n: u8) -> SeatType {
    match n % 4 {
        0 => SeatType::Standard,
        1 => SeatType::Vip,
        2 => SeatType::Couple,
        _ => SeatType::Wheelchair,
    }
}

fn promotion(percent: u32, cap: Option<u32>) -> Promotion {
    let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    Promotion {
        id: 1,
        code: "PROP".to_string(),
        name: "Generated".to_string(),
        promotion_type: PromotionType::Percentage,
        discount_percentage: Some(Decimal::from(percent)),
        discount_amount: None,
        min_purchase_amount: None,
        max_discount_amount: cap.map(Decimal::from),
        start_date: at - Duration::days(1),
        end_date: at + Duration::days(1),
        max_usage_total: None,
        max_usage_per_user: None,
        current_usage: 0,
        is_active: true,
        stackable: false,
        applicable_to: ApplicableTo::default(),
    }
}

fn flat_promotion(cents: u32) -> Promotion {
    Promotion {
        code: "FLAT".to_string(),
        promotion_type: PromotionType::FixedAmount,
        discount_percentage: None,
        discount_amount: Some(Decimal::new(cents as i64, 2)),
        max_discount_amount: None,
        ..promotion(0, None)
    }
}

fn seats_of(types: &[u8]) -> Vec<Seat> {
    types
        .iter()
        .enumerate()
        .map(|(i, t)| Seat {
            id: i as i32 + 1,
            hall_id: 1,
            row: "A".to_string(),
            number: i as i32 + 1,
            seat_type: seat_type(*t),
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_pricing_is_deterministic_and_consistent(
        types in prop::collection::vec(any::<u8>(), 1..=10),
        base in 1_000u32..500_000,
        vip_surcharge in 0u32..50_000,
        tax in 0u32..=25,
        fee in 0u32..20_000,
        percent in 0u32..=60,
        cap in prop::option::of(1_000u32..100_000),
        minor_units in prop::sample::select(vec![0u32, 2]),
    ) {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let seats = seats_of(&types);
        let surcharges = SurchargeTable::from([(SeatType::Vip, Decimal::from(vip_surcharge))]);
        let promo = promotion(percent, cap);
        let engine = PricingEngine::new(
            PricingConfig {
                tax_percent: Decimal::from(tax),
                service_fee: ServiceFeeConfig::Flat { amount: Decimal::from(fee) },
                promotion_policy: PromotionFailurePolicy::Reject,
            },
            "VND",
            minor_units,
        );
        let input = PricingInput {
            showtime_id: 1,
            base_price: Decimal::from(base),
            seats: &seats,
            surcharges: &surcharges,
            promotion: PromotionClaim::Resolved {
                code: "PROP",
                promotion: &promo,
                customer_usage: 0,
            },
            tier: None,
            evaluated_at: at,
        };

        let first = engine.price(&input).unwrap();
        let second = engine.price(&input).unwrap();
        prop_assert_eq!(&first, &second);

        prop_assert!(first.discount_amount >= Decimal::ZERO);
        prop_assert!(first.discount_amount <= first.subtotal);
        prop_assert!(first.total_amount >= Decimal::ZERO);
        prop_assert!(first.total_amount.scale() <= minor_units);

        let ticket_sum: Decimal = first.tickets.iter().map(|t| t.final_price).sum();
        prop_assert_eq!(ticket_sum, first.subtotal - first.discount_amount);
        let discount_sum: Decimal = first.tickets.iter().map(|t| t.discount).sum();
        prop_assert_eq!(discount_sum, first.discount_amount);
        prop_assert_eq!(first.tickets.len(), seats.len());
    }

    #[test]
    fn prop_ticket_discounts_split_small_flat_discounts(
        types in prop::collection::vec(any::<u8>(), 2..=12),
        base_cents in 1u32..=500,
        surcharge_cents in 0u32..=200,
        discount_cents in 1u32..=60,
    ) {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let seats = seats_of(&types);
        let surcharges =
            SurchargeTable::from([(SeatType::Vip, Decimal::new(surcharge_cents as i64, 2))]);
        let promo = flat_promotion(discount_cents);
        let engine = PricingEngine::new(
            PricingConfig {
                tax_percent: Decimal::ZERO,
                service_fee: ServiceFeeConfig::Flat { amount: Decimal::ZERO },
                promotion_policy: PromotionFailurePolicy::Reject,
            },
            "USD",
            2,
        );

        let breakdown = engine
            .price(&PricingInput {
                showtime_id: 1,
                base_price: Decimal::new(base_cents as i64, 2),
                seats: &seats,
                surcharges: &surcharges,
                promotion: PromotionClaim::Resolved {
                    code: "FLAT",
                    promotion: &promo,
                    customer_usage: 0,
                },
                tier: None,
                evaluated_at: at,
            })
            .unwrap();

        for ticket in &breakdown.tickets {
            prop_assert!(ticket.discount >= Decimal::ZERO);
            prop_assert!(ticket.discount <= breakdown.discount_amount);
            prop_assert!(ticket.final_price >= Decimal::ZERO);
            prop_assert_eq!(
                ticket.final_price,
                ticket.base_price + ticket.surcharge - ticket.discount
            );
        }
        let discount_sum: Decimal = breakdown.tickets.iter().map(|t| t.discount).sum();
        prop_assert_eq!(discount_sum, breakdown.discount_amount);
    }

    #[test]
    fn prop_points_never_exceed_spend(
        total in 0u64..10_000_000,
        rate in 1u32..5_000,
    ) {
        let points = PricingEngine::points_earned(Decimal::from(total), Decimal::from(rate), None);
        prop_assert!(points >= 0);
        prop_assert_eq!(points as u64, total / rate as u64);
    }
}
