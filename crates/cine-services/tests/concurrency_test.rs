//! Races between customers for the same seats and vouchers

mod common;

use cine_core::{
    models::{BookingStatus, PaymentMethod, PaymentOutcome, RefundReason, SeatState},
    traits::CatalogRepository,
    AppError,
};
use common::*;
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_no_seat_is_sold_twice() {
    let h = harness(ChargeMode::Succeed);
    let engine = h.engine.clone();

    // 40 customers, each wanting a sliding window of three seats
    let mut tasks = Vec::new();
    for customer in 0..40 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            let first = (customer % 8) + 1;
            let seats = [first, first + 1, first + 2];
            match engine.start_booking(SHOWTIME, &seats, customer).await {
                Ok(started) => {
                    engine
                        .apply_pricing(started.booking_id, None, None)
                        .await
                        .unwrap();
                    engine
                        .submit_payment(started.booking_id, PaymentMethod::CreditCard, None)
                        .await
                        .unwrap();
                    Some(started.booking_id)
                }
                Err(AppError::SeatUnavailable { seat_ids }) => {
                    assert!(!seat_ids.is_empty());
                    None
                }
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }));
    }

    let mut confirmed = Vec::new();
    for task in tasks {
        if let Some(id) = task.await.unwrap() {
            confirmed.push(id);
        }
    }
    assert!(!confirmed.is_empty());

    let mut owners: HashMap<i32, uuid::Uuid> = HashMap::new();
    for id in &confirmed {
        let booking = engine.get_booking(*id).unwrap();
        assert_eq!(booking.status(), BookingStatus::Confirmed);
        for seat in &booking.seat_ids {
            if let Some(previous) = owners.insert(*seat, *id) {
                panic!("seat {seat} sold to {previous} and {id}");
            }
        }
    }

    let map = engine.seat_map(SHOWTIME).await.unwrap();
    let booked = map
        .seats
        .iter()
        .filter(|s| s.state == SeatState::Booked)
        .count();
    assert_eq!(booked, owners.len());
    assert_eq!(map.available, 10 - owners.len());
    assert_eq!(engine.holds().active_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_seat_contention_has_one_winner() {
    let h = harness(ChargeMode::Pending);
    let engine = h.engine.clone();

    let handles: Vec<_> = (0..16)
        .map(|customer| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.start_booking(SHOWTIME, &[9], customer).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(AppError::SeatUnavailable { seat_ids }) => assert_eq!(seat_ids, vec![9]),
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_voucher_redeemed_by_exactly_one_booking() {
    let h = harness(ChargeMode::Pending);
    let engine = h.engine.clone();

    // Both bookings price with the voucher before either pays
    let mut references = Vec::new();
    for (customer, seat) in [(1, 1), (2, 2)] {
        let started = engine.start_booking(SHOWTIME, &[seat], customer).await.unwrap();
        engine
            .apply_pricing(started.booking_id, None, Some("VC-ONE".to_string()))
            .await
            .unwrap();
        let submission = engine
            .submit_payment(started.booking_id, PaymentMethod::CreditCard, None)
            .await
            .unwrap();
        references.push((started.booking_id, submission.reference, submission.amount));
    }

    let callbacks: Vec<_> = references
        .iter()
        .cloned()
        .map(|(_, reference, amount)| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .on_payment_result(
                        &reference,
                        PaymentOutcome::Succeeded {
                            gateway_transaction_id: format!("tx-{reference}"),
                            amount,
                        },
                    )
                    .await
            })
        })
        .collect();

    let mut confirmed = 0;
    let mut lost = 0;
    for callback in callbacks {
        match callback.await.unwrap() {
            Ok(booking) => {
                assert_eq!(booking.status(), BookingStatus::Confirmed);
                confirmed += 1;
            }
            Err(AppError::VoucherUnavailable(code)) => {
                assert_eq!(code, "VC-ONE");
                lost += 1;
            }
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }
    assert_eq!((confirmed, lost), (1, 1));

    let statuses: Vec<_> = references
        .iter()
        .map(|(id, _, _)| engine.get_booking(*id).unwrap().status())
        .collect();
    assert!(statuses.contains(&BookingStatus::Confirmed));
    assert!(statuses.contains(&BookingStatus::Cancelled));

    let refunds = h.gateway.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].reason, RefundReason::RedemptionConflict);
    assert_eq!(engine.redemptions().promotion_usage(2), 1);

    // The loser's seat went back on sale
    assert_eq!(engine.seat_map(SHOWTIME).await.unwrap().available, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_racing_payment_never_leaks_seats() {
    let h = harness(ChargeMode::Pending);
    let engine: Arc<_> = h.engine.clone();

    let started = engine.start_booking(SHOWTIME, &[6, 7], 5).await.unwrap();
    engine
        .apply_pricing(started.booking_id, None, None)
        .await
        .unwrap();
    let submission = engine
        .submit_payment(started.booking_id, PaymentMethod::CreditCard, None)
        .await
        .unwrap();

    let cancel = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.cancel_booking(started.booking_id).await })
    };
    let pay = {
        let engine = engine.clone();
        let reference = submission.reference.clone();
        tokio::spawn(async move {
            engine
                .on_payment_result(
                    &reference,
                    PaymentOutcome::Succeeded {
                        gateway_transaction_id: "tx-race".to_string(),
                        amount: submission.amount,
                    },
                )
                .await
        })
    };
    let _ = cancel.await.unwrap();
    let _ = pay.await.unwrap();

    let booking = engine.get_booking(started.booking_id).unwrap();
    let map = engine.seat_map(SHOWTIME).await.unwrap();
    match booking.status() {
        // Payment won, then the cancel became a refund or lost the race
        BookingStatus::Confirmed | BookingStatus::Refunded => assert_eq!(map.available, 8),
        // Cancel won, the capture was handed back
        BookingStatus::Cancelled => {
            assert_eq!(map.available, 10);
            assert_eq!(h.gateway.refunds()[0].reason, RefundReason::LateCapture);
        }
        other => panic!("unexpected status {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_voucher_single_use_across_engines() {
    let h = harness(ChargeMode::Pending);
    let engines = [h.engine.clone(), h.restart()];

    let mut references = Vec::new();
    for (engine, seat) in engines.iter().zip([3, 4]) {
        let started = engine.start_booking(SHOWTIME, &[seat], seat).await.unwrap();
        engine
            .apply_pricing(started.booking_id, None, Some("VC-ONE".to_string()))
            .await
            .unwrap();
        let submission = engine
            .submit_payment(started.booking_id, PaymentMethod::CreditCard, None)
            .await
            .unwrap();
        references.push((engine.clone(), submission.reference, submission.amount));
    }

    let callbacks: Vec<_> = references
        .into_iter()
        .map(|(engine, reference, amount)| {
            tokio::spawn(async move {
                engine
                    .on_payment_result(
                        &reference,
                        PaymentOutcome::Succeeded {
                            gateway_transaction_id: format!("tx-{reference}"),
                            amount,
                        },
                    )
                    .await
            })
        })
        .collect();

    let mut confirmed = 0;
    for callback in callbacks {
        match callback.await.unwrap() {
            Ok(booking) => {
                assert_eq!(booking.status(), BookingStatus::Confirmed);
                confirmed += 1;
            }
            Err(AppError::VoucherUnavailable(_)) => {}
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }
    assert_eq!(confirmed, 1);

    let refunds = h.gateway.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].reason, RefundReason::RedemptionConflict);
    let promotion = h.catalog.find_promotion(2).await.unwrap().unwrap();
    assert_eq!(promotion.current_usage, 1);
}
