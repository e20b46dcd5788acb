//! Integration tests for the booking API handlers
//!
//! The engine runs against an in-memory catalog and a gateway that leaves
//! every charge pending, so confirmation always goes through the signed
//! webhook.

use actix_web::{http::StatusCode, test, web, App};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use cine_api::{
    configure_bookings, configure_payments, configure_showtimes, WebhookVerifier,
    SIGNATURE_HEADER,
};
use cine_core::{
    config::{BookingConfig, PricingConfig, PromotionFailurePolicy, ServiceFeeConfig},
    models::{
        ApplicableTo, ChargeAck, ChargeRequest, PaymentMethod, Promotion, PromotionType,
        RefundAck, RefundRequest, Seat, SeatType, Showtime, ShowtimeStatus,
    },
    traits::PaymentGateway,
    AppResult, ManualClock,
};
use cine_services::{
    BookingEngine, Collaborators, EngineSettings, HoldManager, InMemoryBookingStore,
    InMemoryCatalog, InMemoryPointsLedger, PricingEngine, SeatInventory, TracingNotifier,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;

const WEBHOOK_SECRET: &str = "whsec_test";

struct PendingGateway;

#[async_trait]
impl PaymentGateway for PendingGateway {
    async fn charge(&self, _request: &ChargeRequest) -> AppResult<ChargeAck> {
        Ok(ChargeAck::Pending)
    }

    async fn refund(&self, request: &RefundRequest) -> AppResult<RefundAck> {
        Ok(RefundAck {
            refund_reference: format!("RF-{}", request.payment_reference),
        })
    }
}

fn engine(clock: Arc<ManualClock>) -> Arc<BookingEngine> {
    let now = Utc::now();
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.add_showtime(Showtime {
        id: 1,
        movie_id: 100,
        hall_id: 1,
        starts_at: now + Duration::days(1),
        base_price: dec!(90000),
        status: ShowtimeStatus::Scheduled,
    });
    catalog.add_seats(
        1,
        (1..=10)
            .map(|id| Seat {
                id,
                hall_id: 1,
                row: "A".to_string(),
                number: id,
                seat_type: if id == 3 || id == 4 {
                    SeatType::Vip
                } else {
                    SeatType::Standard
                },
            })
            .collect(),
    );
    catalog.set_surcharge(SeatType::Vip, dec!(20000));
    catalog.add_promotion(Promotion {
        id: 1,
        code: "TENOFF".to_string(),
        name: "10% off".to_string(),
        promotion_type: PromotionType::Percentage,
        discount_percentage: Some(dec!(10)),
        discount_amount: None,
        min_purchase_amount: None,
        max_discount_amount: Some(dec!(15000)),
        start_date: now - Duration::days(1),
        end_date: now + Duration::days(1),
        max_usage_total: None,
        max_usage_per_user: None,
        current_usage: 0,
        is_active: true,
        stackable: false,
        applicable_to: ApplicableTo::default(),
    });

    let config = BookingConfig::default();
    let inventory = Arc::new(SeatInventory::new(std::time::Duration::from_millis(
        config.lock_timeout_ms,
    )));
    let holds = Arc::new(HoldManager::new(
        inventory,
        clock.clone(),
        Duration::seconds(config.max_hold_duration_secs),
    ));
    let pricing = PricingEngine::new(
        PricingConfig {
            tax_percent: dec!(8),
            service_fee: ServiceFeeConfig::Flat {
                amount: dec!(5000),
            },
            promotion_policy: PromotionFailurePolicy::Reject,
        },
        config.currency.clone(),
        config.currency_minor_units,
    );

    Arc::new(BookingEngine::new(
        Collaborators {
            catalog: catalog.clone(),
            redemptions: catalog,
            bookings: Arc::new(InMemoryBookingStore::new()),
            gateway: Arc::new(PendingGateway),
            notifier: Arc::new(TracingNotifier::new()),
            points: Arc::new(InMemoryPointsLedger::new()),
        },
        holds,
        pricing,
        clock,
        EngineSettings::from(&config),
    ))
}

macro_rules! app {
    ($engine:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::from($engine.clone()))
                .app_data(web::Data::new(WebhookVerifier::new(WEBHOOK_SECRET, 300)))
                .service(
                    web::scope("/api/v1")
                        .configure(configure_bookings)
                        .configure(configure_payments)
                        .configure(configure_showtimes),
                ),
        )
        .await
    };
}

fn signed_with(secret: &str, body: &Value, timestamp: i64) -> test::TestRequest {
    let payload = serde_json::to_vec(body).unwrap();
    let signature = WebhookVerifier::new(secret, 300)
        .sign(&payload, timestamp)
        .unwrap();
    test::TestRequest::post()
        .uri("/api/v1/payments/callback")
        .insert_header((SIGNATURE_HEADER, signature))
        .insert_header(("content-type", "application/json"))
        .set_payload(payload)
}

fn signed_callback(body: &Value) -> test::TestRequest {
    signed_with(WEBHOOK_SECRET, body, Utc::now().timestamp())
}

fn decimal(value: &Value) -> Decimal {
    serde_json::from_value(value.clone()).unwrap()
}

#[actix_web::test]
async fn test_create_booking_holds_seats() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = engine(clock);
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri("/api/v1/bookings")
        .set_json(json!({ "showtime_id": 1, "seat_ids": [2, 1], "customer_id": 7 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["seat_ids"], json!([1, 2]));
    assert!(body["data"]["booking_code"]
        .as_str()
        .unwrap()
        .starts_with("BK"));

    let req = test::TestRequest::get()
        .uri("/api/v1/showtimes/1/seats")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["available_seats"], 8);
}

#[actix_web::test]
async fn test_overlapping_hold_is_conflict() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = engine(clock);
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri("/api/v1/bookings")
        .set_json(json!({ "showtime_id": 1, "seat_ids": [1, 2], "customer_id": 7 }))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::CREATED
    );

    let req = test::TestRequest::post()
        .uri("/api/v1/bookings")
        .set_json(json!({ "showtime_id": 1, "seat_ids": [2, 3], "customer_id": 8 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "seat_unavailable");
    assert_eq!(body["unavailable_seats"], json!([2]));
}

#[actix_web::test]
async fn test_create_booking_validation() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = engine(clock);
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri("/api/v1/bookings")
        .set_json(json!({ "showtime_id": 1, "seat_ids": [], "customer_id": 7 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "validation_error");
}

#[actix_web::test]
async fn test_unknown_booking_is_not_found() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = engine(clock);
    let app = app!(engine);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/bookings/{}", uuid::Uuid::new_v4()))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::NOT_FOUND
    );

    let req = signed_callback(&json!({
        "reference": "PAY-UNKNOWN-1",
        "status": "declined",
        "reason": "insufficient funds"
    }))
    .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[actix_web::test]
async fn test_checkout_through_webhook() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = engine(clock);
    let app = app!(engine);

    let req = test::TestRequest::post()
        .uri("/api/v1/bookings")
        .set_json(json!({ "showtime_id": 1, "seat_ids": [1, 2, 3], "customer_id": 7 }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let booking_id = body["data"]["booking_id"].as_str().unwrap().to_string();

    // Quote
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/bookings/{}/pricing", booking_id))
        .set_json(json!({ "promotion_code": "TENOFF" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let quote = &body["data"];
    assert_eq!(decimal(&quote["subtotal"]), dec!(290000));
    assert_eq!(decimal(&quote["discount_amount"]), dec!(15000));
    assert_eq!(decimal(&quote["total_amount"]), dec!(302000));
    let total = quote["total_amount"].clone();

    // Pay; the gateway answers later
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/bookings/{}/payment", booking_id))
        .set_json(json!({ "method": "credit_card", "quoted_total": total }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["booking_status"], "awaiting_payment");
    let reference = body["data"]["reference"].as_str().unwrap().to_string();

    let callback = json!({
        "reference": reference,
        "status": "succeeded",
        "gateway_transaction_id": "tx-1",
        "amount": total
    });
    let req = signed_callback(&callback).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "confirmed");
    assert_eq!(body["data"]["tickets"].as_array().unwrap().len(), 3);
    assert!(body["data"].get("hold_expires_at").is_none());

    // Redelivery changes nothing
    let req = signed_callback(&callback).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], "confirmed");

    // Admit the first ticket
    let ticket_code = body["data"]["tickets"][0]["ticket_code"]
        .as_str()
        .unwrap()
        .to_string();
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/bookings/{}/check-in", booking_id))
        .set_json(json!({ "ticket_code": ticket_code }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "checked_in");

    let req = test::TestRequest::get()
        .uri("/api/v1/showtimes/1/seats")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["available_seats"], 7);
}

#[actix_web::test]
async fn test_pricing_rejects_promotion_and_voucher_together() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = engine(clock);
    let app = app!(engine);

    let started = engine.start_booking(1, &[5], 7).await.unwrap();
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/bookings/{}/pricing", started.booking_id))
        .set_json(json!({ "promotion_code": "TENOFF", "voucher_code": "VC-1" }))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::BAD_REQUEST
    );

    // No body prices without a promotion
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/bookings/{}/pricing", started.booking_id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(decimal(&body["data"]["total_amount"]), dec!(102200));
}

#[actix_web::test]
async fn test_expired_hold_is_gone() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = engine(clock.clone());
    let app = app!(engine);

    let started = engine.start_booking(1, &[6], 7).await.unwrap();
    clock.advance(Duration::seconds(301));

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/bookings/{}/pricing", started.booking_id))
        .set_json(json!({}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::GONE);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/bookings/{}", started.booking_id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], "expired");
}

#[actix_web::test]
async fn test_cancel_releases_seats() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = engine(clock);
    let app = app!(engine);

    let started = engine.start_booking(1, &[7, 8], 7).await.unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/bookings/{}/cancel", started.booking_id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], "cancelled");

    let req = test::TestRequest::get()
        .uri("/api/v1/showtimes/1/seats")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["available_seats"], 10);
}

#[actix_web::test]
async fn test_extend_hold_moves_deadline() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = engine(clock);
    let app = app!(engine);

    let started = engine.start_booking(1, &[9], 7).await.unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/bookings/{}/extend", started.booking_id))
        .set_json(json!({ "extra_secs": 120 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let deadline: chrono::DateTime<Utc> =
        serde_json::from_value(body["data"]["hold_expires_at"].clone()).unwrap();
    assert_eq!(deadline, started.hold_expires_at + Duration::seconds(120));

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/bookings/{}/extend", started.booking_id))
        .set_json(json!({ "extra_secs": 0 }))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::BAD_REQUEST
    );
}

async fn pending_payment(engine: &BookingEngine, seat: i32) -> (String, Value) {
    let started = engine.start_booking(1, &[seat], 7).await.unwrap();
    let quote = engine
        .apply_pricing(started.booking_id, None, None)
        .await
        .unwrap();
    let submission = engine
        .submit_payment(
            started.booking_id,
            PaymentMethod::CreditCard,
            Some(quote.total_amount),
        )
        .await
        .unwrap();
    (
        started.booking_id.to_string(),
        json!({
            "reference": submission.reference,
            "status": "succeeded",
            "gateway_transaction_id": "tx-1",
            "amount": quote.total_amount
        }),
    )
}

#[actix_web::test]
async fn test_unsigned_callback_is_unauthorized() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = engine(clock);
    let app = app!(engine);
    let (booking_id, callback) = pending_payment(&engine, 4).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/payments/callback")
        .set_json(&callback)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "unauthorized");

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/bookings/{}", booking_id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], "awaiting_payment");
}

#[actix_web::test]
async fn test_forged_callback_cannot_confirm() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = engine(clock);
    let app = app!(engine);
    let (booking_id, callback) = pending_payment(&engine, 5).await;

    // Wrong secret
    let req = signed_with("guessed-secret", &callback, Utc::now().timestamp()).to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::UNAUTHORIZED
    );

    // Replayed outside the tolerance window
    let req = signed_with(WEBHOOK_SECRET, &callback, Utc::now().timestamp() - 3600).to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::UNAUTHORIZED
    );

    // Body swapped under a valid signature
    let signature = WebhookVerifier::new(WEBHOOK_SECRET, 300)
        .sign(&serde_json::to_vec(&callback).unwrap(), Utc::now().timestamp())
        .unwrap();
    let mut swapped = callback.clone();
    swapped["gateway_transaction_id"] = json!("tx-other");
    let req = test::TestRequest::post()
        .uri("/api/v1/payments/callback")
        .insert_header((SIGNATURE_HEADER, signature))
        .insert_header(("content-type", "application/json"))
        .set_payload(serde_json::to_vec(&swapped).unwrap())
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/bookings/{}", booking_id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], "awaiting_payment");

    let resp = test::call_service(&app, signed_callback(&callback).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "confirmed");
}

#[actix_web::test]
async fn test_lookup_by_code_and_customer() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = engine(clock);
    let app = app!(engine);

    let first = engine.start_booking(1, &[1], 7).await.unwrap();
    let second = engine.start_booking(1, &[2], 7).await.unwrap();
    engine.start_booking(1, &[3], 8).await.unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/bookings/code/{}", first.booking_code))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["booking_id"], first.booking_id.to_string());

    let req = test::TestRequest::get()
        .uri("/api/v1/bookings/code/BKNOPE")
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::NOT_FOUND
    );

    let req = test::TestRequest::get()
        .uri("/api/v1/bookings?customer_id=7")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["booking_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first.booking_id.to_string().as_str()));
    assert!(ids.contains(&second.booking_id.to_string().as_str()));

    let req = test::TestRequest::get()
        .uri("/api/v1/bookings?customer_id=0")
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::BAD_REQUEST
    );
}
