//! Shared fixtures for the booking engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use cine_core::{
    config::{BookingConfig, PricingConfig, PromotionFailurePolicy, ServiceFeeConfig},
    models::{
        ApplicableTo, BookingEvent, ChargeAck, ChargeRequest, Membership, MembershipTier,
        PaymentOutcome, Promotion, PromotionType, RefundAck, RefundRequest, Seat, SeatType,
        Showtime, ShowtimeStatus, Voucher, VoucherStatus,
    },
    traits::{NotificationDispatcher, PaymentGateway},
    AppError, AppResult, ManualClock,
};
use cine_services::{
    BookingEngine, Collaborators, EngineSettings, HoldManager, InMemoryBookingStore,
    InMemoryCatalog, InMemoryPointsLedger, PricingEngine, SeatInventory,
};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub const SHOWTIME: i32 = 1;
pub const HALL: i32 = 1;
pub const CUSTOMER: i32 = 7;
pub const GOLD_CUSTOMER: i32 = 42;

/// How the mock gateway answers a charge
#[derive(Debug, Clone, PartialEq)]
pub enum ChargeMode {
    Pending,
    Succeed,
    Decline(String),
    Fail { retryable: bool },
    Unreachable,
}

pub struct MockGateway {
    mode: Mutex<ChargeMode>,
    charges: Mutex<Vec<ChargeRequest>>,
    refunds: Mutex<Vec<RefundRequest>>,
}

impl MockGateway {
    pub fn new(mode: ChargeMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            charges: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: ChargeMode) {
        *self.mode.lock() = mode;
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().clone()
    }

    pub fn refunds(&self) -> Vec<RefundRequest> {
        self.refunds.lock().clone()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn charge(&self, request: &ChargeRequest) -> AppResult<ChargeAck> {
        self.charges.lock().push(request.clone());
        let mode = self.mode.lock().clone();
        match mode {
            ChargeMode::Pending => Ok(ChargeAck::Pending),
            ChargeMode::Succeed => Ok(ChargeAck::Completed(PaymentOutcome::Succeeded {
                gateway_transaction_id: format!("tx-{}", request.reference),
                amount: request.amount,
            })),
            ChargeMode::Decline(reason) => {
                Ok(ChargeAck::Completed(PaymentOutcome::Declined { reason }))
            }
            ChargeMode::Fail { retryable } => Ok(ChargeAck::Completed(PaymentOutcome::Failed {
                reason: "processor error".to_string(),
                retryable,
            })),
            ChargeMode::Unreachable => Err(AppError::PaymentGateway("connection refused".to_string())),
        }
    }

    async fn refund(&self, request: &RefundRequest) -> AppResult<RefundAck> {
        let mut refunds = self.refunds.lock();
        refunds.push(request.clone());
        Ok(RefundAck {
            refund_reference: format!("RF-{}", refunds.len()),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<BookingEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<BookingEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&BookingEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn dispatch(&self, event: &BookingEvent) -> AppResult<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

pub struct Harness {
    pub engine: Arc<BookingEngine>,
    pub clock: Arc<ManualClock>,
    pub catalog: Arc<InMemoryCatalog>,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub points: Arc<InMemoryPointsLedger>,
    pub store: Arc<InMemoryBookingStore>,
    booking: BookingConfig,
    policy: PolicyKind,
}

impl Harness {
    /// Fresh engine over the same catalog, booking store and gateway, as
    /// after a restart or on a second instance
    pub fn restart(&self) -> Arc<BookingEngine> {
        build_engine(
            &self.booking,
            self.policy,
            self.clock.clone(),
            Collaborators {
                catalog: self.catalog.clone(),
                gateway: self.gateway.clone(),
                notifier: self.notifier.clone(),
                points: self.points.clone(),
                redemptions: self.catalog.clone(),
                bookings: self.store.clone(),
            },
        )
    }
}

pub fn seat(id: i32, seat_type: SeatType) -> Seat {
    Seat {
        id,
        hall_id: HALL,
        row: "A".to_string(),
        number: id,
        seat_type,
    }
}

/// Ten seats; 3 and 4 are VIP
pub fn hall_seats() -> Vec<Seat> {
    (1..=10)
        .map(|id| {
            let seat_type = if id == 3 || id == 4 {
                SeatType::Vip
            } else {
                SeatType::Standard
            };
            seat(id, seat_type)
        })
        .collect()
}

pub fn ten_percent_off(now: chrono::DateTime<Utc>) -> Promotion {
    Promotion {
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
    }
}

pub fn voucher_promotion(now: chrono::DateTime<Utc>) -> Promotion {
    Promotion {
        id: 2,
        code: "VOUCHER20K".to_string(),
        name: "20k voucher".to_string(),
        promotion_type: PromotionType::FixedAmount,
        discount_percentage: None,
        discount_amount: Some(dec!(20000)),
        min_purchase_amount: None,
        max_discount_amount: None,
        start_date: now - Duration::days(1),
        end_date: now + Duration::days(30),
        max_usage_total: None,
        max_usage_per_user: None,
        current_usage: 0,
        is_active: true,
        stackable: false,
        applicable_to: ApplicableTo::default(),
    }
}

pub fn harness(mode: ChargeMode) -> Harness {
    harness_with(mode, BookingConfig::default(), PolicyKind::Reject)
}

#[derive(Debug, Clone, Copy)]
pub enum PolicyKind {
    Reject,
    Continue,
}

pub fn harness_with(mode: ChargeMode, booking: BookingConfig, policy: PolicyKind) -> Harness {
    let now = Utc::now();
    let clock = Arc::new(ManualClock::new(now));

    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.add_showtime(Showtime {
        id: SHOWTIME,
        movie_id: 100,
        hall_id: HALL,
        starts_at: now + Duration::days(1),
        base_price: dec!(90000),
        status: ShowtimeStatus::Scheduled,
    });
    catalog.add_seats(HALL, hall_seats());
    catalog.set_surcharge(SeatType::Vip, dec!(20000));
    catalog.add_promotion(ten_percent_off(now));
    catalog.add_promotion(voucher_promotion(now));
    catalog.add_voucher(Voucher {
        id: 1,
        code: "VC-ONE".to_string(),
        promotion_id: 2,
        customer_id: None,
        status: VoucherStatus::Available,
        expires_at: Some(now + Duration::days(30)),
    });
    catalog.add_membership(Membership {
        customer_id: GOLD_CUSTOMER,
        tier: MembershipTier {
            id: 2,
            tier_name: "Gold".to_string(),
            tier_level: 2,
            discount_percentage: dec!(5),
            points_earn_rate: dec!(1.5),
        },
        available_points: 0,
    });

    let gateway = Arc::new(MockGateway::new(mode));
    let notifier = Arc::new(RecordingNotifier::default());
    let points = Arc::new(InMemoryPointsLedger::new());

    let store = Arc::new(InMemoryBookingStore::new());

    let engine = build_engine(
        &booking,
        policy,
        clock.clone(),
        Collaborators {
            catalog: catalog.clone(),
            gateway: gateway.clone(),
            notifier: notifier.clone(),
            points: points.clone(),
            redemptions: catalog.clone(),
            bookings: store.clone(),
        },
    );

    Harness {
        engine,
        clock,
        catalog,
        gateway,
        notifier,
        points,
        store,
        booking,
        policy,
    }
}

fn build_engine(
    booking: &BookingConfig,
    policy: PolicyKind,
    clock: Arc<ManualClock>,
    collaborators: Collaborators,
) -> Arc<BookingEngine> {
    let inventory = Arc::new(SeatInventory::new(std::time::Duration::from_millis(
        booking.lock_timeout_ms,
    )));
    let holds = Arc::new(HoldManager::new(
        inventory,
        clock.clone(),
        Duration::seconds(booking.max_hold_duration_secs),
    ));
    let pricing = PricingEngine::new(
        PricingConfig {
            tax_percent: dec!(8),
            service_fee: ServiceFeeConfig::Flat {
                amount: dec!(5000),
            },
            promotion_policy: match policy {
                PolicyKind::Reject => PromotionFailurePolicy::Reject,
                PolicyKind::Continue => PromotionFailurePolicy::ContinueWithoutDiscount,
            },
        },
        booking.currency.clone(),
        booking.currency_minor_units,
    );

    Arc::new(BookingEngine::new(
        collaborators,
        holds,
        pricing,
        clock,
        EngineSettings::from(booking),
    ))
}
