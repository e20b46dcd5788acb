//! Booking state machine
//!
//! Drives a booking from seat selection to a confirmed, paid booking:
//! - Start: hold the seats and open the booking
//! - Pricing: freeze a price breakdown against a reference-data snapshot
//! - Payment: submit the frozen total, apply the gateway outcome
//! - Cancel / refund / expire
//!
//! Each booking record sits behind its own lock. Lock order is always
//! booking -> hold -> seat slots -> redemption ledger, and no lock is held
//! across an `.await`: async reads happen first, then the record is locked
//! again and the expected state re-checked before anything is written.
//!
//! Side effects (notifications, points accrual, refunds, persistence of
//! settled bookings) run after the record is unlocked. Their failures are
//! logged and never roll back the booking.
//!
//! Voucher and promotion use is made durable through the `RedemptionStore`
//! before the confirmation commit and revoked again if the commit does not
//! confirm the booking. Confirmed, refunded and closed bookings are written
//! to the `BookingRepository`, so they can be read back after the engine has
//! evicted them or restarted.

use chrono::{DateTime, Duration, Utc};
use cine_core::{
    config::BookingConfig,
    models::{
        Booking, BookingEvent, BookingId, BookingStatus, ChargeAck, ChargeRequest, CustomerId,
        PaymentAttempt, PaymentMethod, PaymentOutcome, PaymentStatus, PointsTransaction,
        PriceBreakdown, PricingSnapshot, Promotion, PromotionRejection, Redemption,
        RefundReason, RefundRequest, Seat, SeatAvailability, SeatId, Showtime, ShowtimeId,
        Ticket, TicketStatus,
    },
    traits::{
        BookingRepository, CatalogRepository, NotificationDispatcher, PaymentGateway,
        PointsLedger, RedemptionStore,
    },
    AppError, AppResult, Clock,
};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::hold_manager::HoldManager;
use crate::pricing::{PricingEngine, PricingInput, PromotionClaim};
use crate::redemption::RedemptionLedger;

/// External systems the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub points: Arc<dyn PointsLedger>,
    pub redemptions: Arc<dyn RedemptionStore>,
    pub bookings: Arc<dyn BookingRepository>,
}

/// Checkout rules
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub hold_ttl: Duration,
    pub refund_cutoff: Duration,
    pub max_seats_per_booking: usize,
    pub points_conversion_rate: Decimal,
    pub currency: String,
    /// Settled bookings and seat arenas are evicted this long after the show starts
    pub evict_after_show: Duration,
}

impl From<&BookingConfig> for EngineSettings {
    fn from(config: &BookingConfig) -> Self {
        Self {
            hold_ttl: Duration::seconds(config.hold_ttl_secs),
            refund_cutoff: Duration::minutes(config.refund_cutoff_minutes),
            max_seats_per_booking: config.max_seats_per_booking,
            points_conversion_rate: config.points_conversion_rate,
            currency: config.currency.clone(),
            evict_after_show: Duration::minutes(config.evict_after_show_minutes),
        }
    }
}

/// Result of `start_booking`
#[derive(Debug, Clone, Serialize)]
pub struct StartedBooking {
    pub booking_id: BookingId,
    pub booking_code: String,
    pub seat_ids: Vec<SeatId>,
    pub hold_expires_at: DateTime<Utc>,
}

/// Result of `submit_payment`
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSubmission {
    pub booking_id: BookingId,
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub booking_status: BookingStatus,
}

/// Seat map of a showtime
#[derive(Debug, Clone, Serialize)]
pub struct SeatMap {
    pub showtime_id: ShowtimeId,
    pub available: usize,
    pub seats: Vec<SeatAvailability>,
}

/// What one eviction pass removed from memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Eviction {
    pub bookings: usize,
    pub showtimes: usize,
}

/// Work deferred until the booking lock is released
enum SideEffect {
    Notify(BookingEvent),
    AccruePoints {
        booking_id: BookingId,
        booking_code: String,
        customer_id: CustomerId,
        total: Decimal,
    },
    Refund(RefundRequest),
    /// Write the record's state at the time the effect runs
    Persist(BookingId),
    Revoke(BookingId),
}

/// Durable redemption made ahead of the confirmation commit
#[derive(Debug, Clone, PartialEq, Eq)]
enum Redeemed {
    Nothing,
    Recorded,
    Conflict(String),
}

/// Promotion resolved from the catalog, owned so it outlives the lookups
enum ResolvedPromotion {
    None,
    Found {
        code: String,
        promotion: Promotion,
        customer_usage: i32,
        voucher_code: Option<String>,
    },
    Rejected {
        code: String,
        reason: PromotionRejection,
    },
}

/// Booking engine
pub struct BookingEngine {
    catalog: Arc<dyn CatalogRepository>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationDispatcher>,
    points: Arc<dyn PointsLedger>,
    store: Arc<dyn RedemptionStore>,
    repository: Arc<dyn BookingRepository>,
    holds: Arc<HoldManager>,
    pricing: PricingEngine,
    redemptions: RedemptionLedger,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    bookings: RwLock<HashMap<BookingId, Arc<Mutex<Booking>>>>,
    payment_refs: RwLock<HashMap<String, BookingId>>,
    showtime_starts: RwLock<HashMap<ShowtimeId, DateTime<Utc>>>,
}

impl BookingEngine {
    /// Create a new booking engine
    pub fn new(
        collaborators: Collaborators,
        holds: Arc<HoldManager>,
        pricing: PricingEngine,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            catalog: collaborators.catalog,
            gateway: collaborators.gateway,
            notifier: collaborators.notifier,
            points: collaborators.points,
            store: collaborators.redemptions,
            repository: collaborators.bookings,
            holds,
            pricing,
            redemptions: RedemptionLedger::new(),
            clock,
            settings,
            bookings: RwLock::new(HashMap::new()),
            payment_refs: RwLock::new(HashMap::new()),
            showtime_starts: RwLock::new(HashMap::new()),
        }
    }

    pub fn holds(&self) -> &Arc<HoldManager> {
        &self.holds
    }

    pub fn redemptions(&self) -> &RedemptionLedger {
        &self.redemptions
    }

    fn record(&self, booking_id: BookingId) -> AppResult<Arc<Mutex<Booking>>> {
        self.bookings
            .read()
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))
    }

    /// Put a booking read from the repository back in memory
    ///
    /// A record that appeared in the meantime wins over the stored copy.
    fn cache_record(&self, booking: Booking) -> Arc<Mutex<Booking>> {
        let booking_id = booking.id;
        let reference = booking.payment.as_ref().map(|p| p.reference.clone());
        let record = self
            .bookings
            .write()
            .entry(booking_id)
            .or_insert_with(|| Arc::new(Mutex::new(booking)))
            .clone();
        if let Some(reference) = reference {
            self.payment_refs.write().insert(reference, booking_id);
        }
        debug!("Loaded booking {} from the repository", booking_id);
        record
    }

    /// In-memory record, falling back to the repository
    async fn load_record(&self, booking_id: BookingId) -> AppResult<Arc<Mutex<Booking>>> {
        if let Ok(record) = self.record(booking_id) {
            return Ok(record);
        }
        let booking = self
            .repository
            .find(booking_id)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))?;
        Ok(self.cache_record(booking))
    }

    /// Snapshot of a booking held in memory
    pub fn get_booking(&self, booking_id: BookingId) -> AppResult<Booking> {
        Ok(self.record(booking_id)?.lock().clone())
    }

    /// Snapshot of a booking, live or stored
    pub async fn find_booking(&self, booking_id: BookingId) -> AppResult<Booking> {
        Ok(self.load_record(booking_id).await?.lock().clone())
    }

    /// Look a booking up by its customer-facing code
    pub async fn find_booking_by_code(&self, booking_code: &str) -> AppResult<Booking> {
        let live = self
            .bookings
            .read()
            .values()
            .map(|record| record.lock().clone())
            .find(|booking| booking.booking_code == booking_code);
        if let Some(booking) = live {
            return Ok(booking);
        }
        self.repository
            .find_by_code(booking_code)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(booking_code.to_string()))
    }

    /// Bookings of a customer, newest first
    ///
    /// Live records take precedence over their stored copies.
    pub async fn customer_bookings(&self, customer_id: CustomerId) -> AppResult<Vec<Booking>> {
        let mut found: Vec<Booking> = self
            .bookings
            .read()
            .values()
            .map(|record| record.lock().clone())
            .filter(|booking| booking.customer_id == customer_id)
            .collect();
        let live: HashSet<BookingId> = found.iter().map(|b| b.id).collect();

        found.extend(
            self.repository
                .find_by_customer(customer_id)
                .await?
                .into_iter()
                .filter(|booking| !live.contains(&booking.id)),
        );
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    /// Load the showtime and make sure its slot arena exists
    ///
    /// A new arena starts with the seats already sold according to the
    /// booking repository.
    async fn load_showtime(&self, showtime_id: ShowtimeId) -> AppResult<(Showtime, Vec<Seat>)> {
        let showtime = self
            .catalog
            .find_showtime(showtime_id)
            .await?
            .ok_or_else(|| AppError::ShowtimeNotFound(showtime_id.to_string()))?;
        let seats = self.catalog.find_seats_by_hall(showtime.hall_id).await?;
        self.showtime_starts
            .write()
            .insert(showtime.id, showtime.starts_at);

        let inventory = self.holds.inventory();
        if !inventory.is_registered(showtime.id) {
            let sold = self.repository.sold_seats(showtime.id).await?;
            inventory.register_showtime_with_sold(
                showtime.id,
                seats.iter().map(|s| s.id).collect(),
                &sold,
            );
        }

        Ok((showtime, seats))
    }

    async fn showtime_start(&self, showtime_id: ShowtimeId) -> AppResult<Option<DateTime<Utc>>> {
        if let Some(start) = self.showtime_starts.read().get(&showtime_id) {
            return Ok(Some(*start));
        }
        let start = self
            .catalog
            .find_showtime(showtime_id)
            .await?
            .map(|showtime| showtime.starts_at);
        if let Some(start) = start {
            self.showtime_starts.write().insert(showtime_id, start);
        }
        Ok(start)
    }

    /// Queue a write of a booking that reached a settled state
    fn persist_settled(booking: &Booking, effects: &mut Vec<SideEffect>) {
        if booking.is_settled() {
            effects.push(SideEffect::Persist(booking.id));
        }
    }

    /// Hold seats and open a booking
    ///
    /// # Arguments
    ///
    /// * `showtime_id` - Showtime to book
    /// * `seat_ids` - Seats to hold
    /// * `customer_id` - Customer making the booking
    ///
    /// # Errors
    ///
    /// Returns `SeatUnavailable` with the taken seats; no booking is created
    /// in that case.
    #[instrument(skip(self, seat_ids), fields(seats = seat_ids.len()))]
    pub async fn start_booking(
        &self,
        showtime_id: ShowtimeId,
        seat_ids: &[SeatId],
        customer_id: CustomerId,
    ) -> AppResult<StartedBooking> {
        if seat_ids.is_empty() {
            return Err(AppError::InvalidInput("select at least one seat".to_string()));
        }
        if seat_ids.len() > self.settings.max_seats_per_booking {
            return Err(AppError::InvalidInput(format!(
                "at most {} seats per booking",
                self.settings.max_seats_per_booking
            )));
        }

        let (showtime, _) = self.load_showtime(showtime_id).await?;
        let now = self.clock.now();
        if !showtime.is_on_sale(now) {
            return Err(AppError::Conflict(format!(
                "showtime {} is not on sale",
                showtime_id
            )));
        }

        let booking_id = Uuid::new_v4();
        let mut booking = Booking::draft(booking_id, showtime_id, customer_id, seat_ids.to_vec(), now);

        let hold = self
            .holds
            .create_hold(showtime_id, seat_ids, booking_id, self.settings.hold_ttl)?;

        booking.hold_id = Some(hold.id);
        booking.hold_expires_at = Some(hold.expires_at);
        booking.transition_to(BookingStatus::Holding, now)?;

        let started = StartedBooking {
            booking_id,
            booking_code: booking.booking_code.clone(),
            seat_ids: booking.seat_ids.clone(),
            hold_expires_at: hold.expires_at,
        };
        self.bookings
            .write()
            .insert(booking_id, Arc::new(Mutex::new(booking)));

        info!(
            "Started booking {} ({}) for customer {} on showtime {}",
            booking_id, started.booking_code, customer_id, showtime_id
        );
        Ok(started)
    }

    /// Expire a booking whose hold deadline has passed, under its lock
    fn expire_locked(
        &self,
        booking: &mut Booking,
        now: DateTime<Utc>,
        effects: &mut Vec<SideEffect>,
    ) -> AppResult<()> {
        if let Some(hold_id) = booking.hold_id {
            if self.holds.expire_hold(hold_id)?.is_none() {
                // Already expired by a contender or the sweeper
                self.holds.release_hold(hold_id)?;
            }
        }
        booking.transition_to(BookingStatus::Expired, now)?;
        effects.push(SideEffect::Notify(BookingEvent::Expired {
            booking_id: booking.id,
            customer_id: booking.customer_id,
        }));
        Self::persist_settled(booking, effects);
        info!("Booking {} expired", booking.id);
        Ok(())
    }

    /// Reject work on a booking whose hold has lapsed, expiring it
    fn ensure_hold_live(
        &self,
        booking: &mut Booking,
        now: DateTime<Utc>,
        effects: &mut Vec<SideEffect>,
    ) -> AppResult<()> {
        if booking.status().is_pre_confirmed() && booking.hold_expired_at(now) {
            self.expire_locked(booking, now, effects)?;
            return Err(AppError::HoldExpired(format!("booking {}", booking.id)));
        }
        Ok(())
    }

    async fn resolve_promotion(
        &self,
        booking_id: BookingId,
        customer_id: CustomerId,
        promotion_code: Option<String>,
        voucher_code: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<ResolvedPromotion> {
        let (code, promotion, voucher_code) = match (promotion_code, voucher_code) {
            (Some(_), Some(_)) => {
                return Err(AppError::InvalidInput(
                    "use either a promotion code or a voucher, not both".to_string(),
                ))
            }
            (None, None) => return Ok(ResolvedPromotion::None),
            (Some(code), None) => {
                let promotion = self.catalog.find_promotion_by_code(&code).await?;
                (code, promotion, None)
            }
            (None, Some(code)) => {
                let Some(voucher) = self.catalog.find_voucher_by_code(&code).await? else {
                    return Ok(ResolvedPromotion::Rejected {
                        code,
                        reason: PromotionRejection::UnknownCode,
                    });
                };
                if let Err(reason) = voucher.check(customer_id, now) {
                    return Ok(ResolvedPromotion::Rejected { code, reason });
                }
                if let Some(claim) = self.redemptions.voucher_claim(&code) {
                    if claim.booking_id != booking_id {
                        return Ok(ResolvedPromotion::Rejected {
                            code,
                            reason: PromotionRejection::VoucherUsed,
                        });
                    }
                }
                let promotion = self.catalog.find_promotion(voucher.promotion_id).await?;
                (code.clone(), promotion, Some(code))
            }
        };

        let Some(promotion) = promotion else {
            return Ok(ResolvedPromotion::Rejected {
                code,
                reason: PromotionRejection::UnknownCode,
            });
        };

        // The catalog already counts every durable redemption
        let customer_usage = self
            .catalog
            .count_customer_promotion_usage(promotion.id, customer_id)
            .await?;

        Ok(ResolvedPromotion::Found {
            code,
            promotion,
            customer_usage,
            voucher_code,
        })
    }

    /// Price the held seats and freeze the result on the booking
    ///
    /// Allowed while HOLDING, and again while PRICED to change the
    /// promotion.
    ///
    /// # Errors
    ///
    /// - `HoldExpired` if the hold lapsed (the booking is expired)
    /// - `InvalidPromotion` when the promotion is rejected under the
    ///   reject policy; the booking is left unchanged
    #[instrument(skip(self))]
    pub async fn apply_pricing(
        &self,
        booking_id: BookingId,
        promotion_code: Option<String>,
        voucher_code: Option<String>,
    ) -> AppResult<PriceBreakdown> {
        let record = self.load_record(booking_id).await?;
        let mut effects = Vec::new();

        let checked = {
            let mut booking = record.lock();
            let now = self.clock.now();
            self.ensure_hold_live(&mut booking, now, &mut effects)
                .and_then(|_| {
                    booking.expect_status(
                        &[BookingStatus::Holding, BookingStatus::Priced],
                        BookingStatus::Priced,
                    )
                })
                .map(|_| {
                    (
                        booking.showtime_id,
                        booking.customer_id,
                        booking.seat_ids.clone(),
                    )
                })
        };
        let (showtime_id, customer_id, seat_ids) = match checked {
            Ok(values) => values,
            Err(e) => {
                self.run_effects(effects).await;
                return Err(e);
            }
        };

        let evaluated_at = self.clock.now();
        let (showtime, hall_seats) = self.load_showtime(showtime_id).await?;
        let surcharges = self.catalog.seat_surcharges().await?;
        let membership = self.catalog.find_membership(customer_id).await?;
        let resolved = self
            .resolve_promotion(booking_id, customer_id, promotion_code, voucher_code, evaluated_at)
            .await?;

        let seats: Vec<_> = hall_seats
            .into_iter()
            .filter(|seat| seat_ids.contains(&seat.id))
            .collect();
        if seats.len() != seat_ids.len() {
            return Err(AppError::InconsistentState(format!(
                "booking {} references seats missing from hall {}",
                booking_id, showtime.hall_id
            )));
        }

        let claim = match &resolved {
            ResolvedPromotion::None => PromotionClaim::None,
            ResolvedPromotion::Found {
                code,
                promotion,
                customer_usage,
                ..
            } => PromotionClaim::Resolved {
                code,
                promotion,
                customer_usage: *customer_usage,
            },
            ResolvedPromotion::Rejected { code, reason } => PromotionClaim::Rejected {
                code,
                reason: *reason,
            },
        };

        let breakdown = self.pricing.price(&PricingInput {
            showtime_id,
            base_price: showtime.base_price,
            seats: &seats,
            surcharges: &surcharges,
            promotion: claim,
            tier: membership.as_ref().map(|m| &m.tier),
            evaluated_at,
        })?;

        let applied = breakdown.promotion_rejection.is_none();
        let (promotion_id, promotion_code, voucher_code) = match resolved {
            ResolvedPromotion::Found {
                code,
                promotion,
                voucher_code,
                ..
            } if applied => (Some(promotion.id), Some(code), voucher_code),
            _ => (None, None, None),
        };
        let snapshot = PricingSnapshot {
            breakdown: breakdown.clone(),
            promotion_id,
            promotion_code,
            voucher_code,
        };

        let result = {
            let mut booking = record.lock();
            let now = self.clock.now();
            self.ensure_hold_live(&mut booking, now, &mut effects)
                .and_then(|_| {
                    booking.expect_status(
                        &[BookingStatus::Holding, BookingStatus::Priced],
                        BookingStatus::Priced,
                    )
                })
                .and_then(|_| {
                    booking.pricing = Some(snapshot);
                    booking.transition_to(BookingStatus::Priced, now)
                })
        };
        self.run_effects(effects).await;
        result?;

        info!(
            "Priced booking {}: total {} {}",
            booking_id, breakdown.total_amount, breakdown.currency
        );
        Ok(breakdown)
    }

    /// Push the hold deadline back
    #[instrument(skip(self))]
    pub async fn extend_hold(&self, booking_id: BookingId, extra: Duration) -> AppResult<Booking> {
        let record = self.load_record(booking_id).await?;
        let mut effects = Vec::new();

        let result = {
            let mut booking = record.lock();
            let now = self.clock.now();
            self.ensure_hold_live(&mut booking, now, &mut effects)
                .and_then(|_| {
                    if !booking.status().is_pre_confirmed() {
                        return Err(AppError::Conflict(format!(
                            "booking {} is {} and holds no seats",
                            booking_id,
                            booking.status()
                        )));
                    }
                    let hold_id = booking.hold_id.ok_or_else(|| {
                        AppError::InconsistentState(format!("booking {} has no hold", booking_id))
                    })?;
                    let hold = self.holds.extend_hold(hold_id, extra)?;
                    booking.hold_expires_at = Some(hold.expires_at);
                    booking.updated_at = now;
                    Ok(booking.clone())
                })
        };
        self.run_effects(effects).await;
        result
    }

    /// Submit the frozen total to the payment gateway
    ///
    /// The booking moves to AWAITING_PAYMENT before the gateway is called.
    /// A synchronous outcome is applied immediately; otherwise it arrives
    /// through `on_payment_result`.
    ///
    /// # Errors
    ///
    /// - `PriceMismatch` when `quoted_total` differs from the frozen total
    /// - `PaymentDeclined` when the gateway declines synchronously; the
    ///   booking returns to PRICED and keeps its hold
    /// - `PaymentGateway` on transport failure; the booking stays in
    ///   AWAITING_PAYMENT and the payment may be resubmitted
    #[instrument(skip(self))]
    pub async fn submit_payment(
        &self,
        booking_id: BookingId,
        method: PaymentMethod,
        quoted_total: Option<Decimal>,
    ) -> AppResult<PaymentSubmission> {
        let record = self.load_record(booking_id).await?;
        let mut effects = Vec::new();

        let prepared = {
            let mut booking = record.lock();
            let now = self.clock.now();
            self.ensure_hold_live(&mut booking, now, &mut effects)
                .and_then(|_| self.prepare_charge(&mut booking, method, quoted_total, now))
        };
        self.run_effects(effects).await;
        let request = prepared?;

        self.payment_refs
            .write()
            .insert(request.reference.clone(), booking_id);

        info!(
            "Charging {} {} for booking {} (ref {})",
            request.amount, request.currency, booking_id, request.reference
        );

        match self.gateway.charge(&request).await {
            Ok(ChargeAck::Pending) => Ok(PaymentSubmission {
                booking_id,
                reference: request.reference,
                amount: request.amount,
                currency: request.currency,
                payment_status: PaymentStatus::Pending,
                booking_status: BookingStatus::AwaitingPayment,
            }),
            Ok(ChargeAck::Completed(outcome)) => {
                let declined = match &outcome {
                    PaymentOutcome::Declined { reason } => Some(reason.clone()),
                    _ => None,
                };
                let booking = self.on_payment_result(&request.reference, outcome).await?;
                if let Some(reason) = declined {
                    return Err(AppError::PaymentDeclined(reason));
                }
                let payment_status = booking
                    .payment
                    .as_ref()
                    .map_or(PaymentStatus::Pending, |p| p.status);
                Ok(PaymentSubmission {
                    booking_id,
                    reference: request.reference,
                    amount: request.amount,
                    currency: request.currency,
                    payment_status,
                    booking_status: booking.status(),
                })
            }
            Err(e) => {
                warn!(
                    "Gateway error charging booking {} (ref {}): {}",
                    booking_id, request.reference, e
                );
                let (reason, err) = match e {
                    AppError::PaymentGateway(reason) => {
                        (reason.clone(), AppError::PaymentGateway(reason))
                    }
                    other => {
                        let reason = other.to_string();
                        (reason.clone(), AppError::PaymentGateway(reason))
                    }
                };
                let mut booking = record.lock();
                if let Some(attempt) = booking.payment.as_mut() {
                    if attempt.reference == request.reference
                        && attempt.status == PaymentStatus::Pending
                    {
                        attempt.status = PaymentStatus::Failed;
                        attempt.failure_reason = Some(reason);
                    }
                }
                Err(err)
            }
        }
    }

    fn prepare_charge(
        &self,
        booking: &mut Booking,
        method: PaymentMethod,
        quoted_total: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> AppResult<ChargeRequest> {
        match booking.status() {
            BookingStatus::Priced => {}
            BookingStatus::AwaitingPayment => {
                let retryable = booking
                    .payment
                    .as_ref()
                    .map_or(false, |p| p.status == PaymentStatus::Failed);
                if !retryable {
                    return Err(AppError::Conflict(format!(
                        "payment for booking {} is already in progress",
                        booking.id
                    )));
                }
            }
            other => {
                return Err(AppError::InvalidTransition {
                    from: other,
                    to: BookingStatus::AwaitingPayment,
                })
            }
        }

        let total = booking.total_amount().ok_or_else(|| {
            AppError::InconsistentState(format!("booking {} has no frozen price", booking.id))
        })?;
        if let Some(quoted) = quoted_total {
            if quoted != total {
                warn!(
                    "Quoted total {} for booking {} does not match frozen {}",
                    quoted, booking.id, total
                );
                return Err(AppError::PriceMismatch {
                    quoted: quoted.to_string(),
                    frozen: total.to_string(),
                });
            }
        }

        booking.transition_to(BookingStatus::AwaitingPayment, now)?;
        booking.payment_attempts += 1;
        // Unguessable, so a callback cannot be aimed at a booking from its code alone
        let reference = format!(
            "PAY-{}-{}-{}",
            booking.booking_code,
            booking.payment_attempts,
            Uuid::new_v4().simple()
        );
        booking.payment = Some(PaymentAttempt::pending(reference.clone(), method, total, now));

        Ok(ChargeRequest {
            booking_id: booking.id,
            reference,
            amount: total,
            currency: self.settings.currency.clone(),
            method,
        })
    }

    /// Apply a gateway outcome
    ///
    /// Duplicate deliveries for an already resolved attempt return the
    /// current booking without changes. A capture that cannot be honoured
    /// (booking expired, cancelled, voucher lost to another booking, amount
    /// mismatch) is refunded.
    #[instrument(skip(self, outcome), fields(outcome = outcome.label()))]
    pub async fn on_payment_result(
        &self,
        reference: &str,
        outcome: PaymentOutcome,
    ) -> AppResult<Booking> {
        let record = self.payment_record(reference).await?;

        let pending = {
            let booking = record.lock();
            self.pending_redemption(&booking, reference, &outcome, self.clock.now())
        };
        let redeemed = match pending {
            None => Redeemed::Nothing,
            Some(redemption) => match self.store.redeem(&redemption).await {
                Ok(()) => Redeemed::Recorded,
                Err(AppError::VoucherUnavailable(code)) => Redeemed::Conflict(code),
                Err(e) => {
                    // Nothing applied; a redelivered callback retries
                    error!(
                        "Recording redemption of booking {} failed: {}",
                        redemption.booking_id, e
                    );
                    return Err(e);
                }
            },
        };

        let mut effects = Vec::new();
        let result = {
            let mut booking = record.lock();
            let now = self.clock.now();
            let result =
                self.apply_outcome(&mut booking, reference, outcome, &redeemed, now, &mut effects);
            if redeemed == Redeemed::Recorded && booking.status() != BookingStatus::Confirmed {
                effects.push(SideEffect::Revoke(booking.id));
            }
            Self::persist_settled(&booking, &mut effects);
            result
        };
        self.run_effects(effects).await;
        result
    }

    /// Record behind a payment reference, live or stored
    async fn payment_record(&self, reference: &str) -> AppResult<Arc<Mutex<Booking>>> {
        let live = self.payment_refs.read().get(reference).copied();
        if let Some(booking_id) = live {
            return self.load_record(booking_id).await;
        }
        let booking = self
            .repository
            .find_by_payment_reference(reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment reference {}", reference)))?;
        Ok(self.cache_record(booking))
    }

    /// Redemption a success callback would commit, if it can still confirm
    fn pending_redemption(
        &self,
        booking: &Booking,
        reference: &str,
        outcome: &PaymentOutcome,
        now: DateTime<Utc>,
    ) -> Option<Redemption> {
        if !matches!(outcome, PaymentOutcome::Succeeded { .. })
            || booking.status() != BookingStatus::AwaitingPayment
            || booking.hold_expired_at(now)
        {
            return None;
        }
        let attempt = booking.payment.as_ref()?;
        if attempt.reference != reference
            || !matches!(attempt.status, PaymentStatus::Pending | PaymentStatus::Failed)
        {
            return None;
        }
        let snapshot = booking.pricing.as_ref()?;
        Redemption::for_snapshot(snapshot, booking.id, booking.customer_id, now)
    }

    fn apply_outcome(
        &self,
        booking: &mut Booking,
        reference: &str,
        outcome: PaymentOutcome,
        redeemed: &Redeemed,
        now: DateTime<Utc>,
        effects: &mut Vec<SideEffect>,
    ) -> AppResult<Booking> {
        let current = booking
            .payment
            .as_ref()
            .filter(|attempt| attempt.reference == reference)
            .map(|attempt| attempt.status);

        let Some(attempt_status) = current else {
            warn!(
                "Callback for superseded payment {} of booking {}",
                reference, booking.id
            );
            if let PaymentOutcome::Succeeded {
                gateway_transaction_id,
                amount,
            } = outcome
            {
                effects.push(SideEffect::Refund(self.refund_request(
                    booking,
                    reference,
                    gateway_transaction_id,
                    amount,
                    RefundReason::LateCapture,
                )));
            }
            return Ok(booking.clone());
        };

        if !matches!(attempt_status, PaymentStatus::Pending | PaymentStatus::Failed) {
            debug!(
                "Duplicate {} callback for payment {} ignored",
                outcome.label(),
                reference
            );
            return Ok(booking.clone());
        }

        match outcome {
            PaymentOutcome::Succeeded {
                gateway_transaction_id,
                amount,
            } => self.apply_success(
                booking,
                reference,
                gateway_transaction_id,
                amount,
                redeemed,
                now,
                effects,
            ),
            PaymentOutcome::Declined { reason } => {
                self.resolve_attempt(booking, PaymentStatus::Declined, Some(reason.clone()), now);
                if booking.status() == BookingStatus::AwaitingPayment {
                    booking.transition_to(BookingStatus::Priced, now)?;
                    effects.push(SideEffect::Notify(BookingEvent::PaymentFailed {
                        booking_id: booking.id,
                        customer_id: booking.customer_id,
                        reason: reason.clone(),
                    }));
                }
                info!("Payment {} declined: {}", reference, reason);
                Ok(booking.clone())
            }
            PaymentOutcome::Failed {
                reason,
                retryable: true,
            } => {
                if let Some(attempt) = booking.payment.as_mut() {
                    attempt.status = PaymentStatus::Failed;
                    attempt.failure_reason = Some(reason.clone());
                }
                warn!("Payment {} failed transiently: {}", reference, reason);
                Ok(booking.clone())
            }
            PaymentOutcome::Failed {
                reason,
                retryable: false,
            } => {
                self.resolve_attempt(booking, PaymentStatus::Rejected, Some(reason.clone()), now);
                if booking.status() == BookingStatus::AwaitingPayment {
                    if let Some(hold_id) = booking.hold_id {
                        self.holds.release_hold(hold_id)?;
                    }
                    booking.transition_to(BookingStatus::Cancelled, now)?;
                    effects.push(SideEffect::Notify(BookingEvent::PaymentFailed {
                        booking_id: booking.id,
                        customer_id: booking.customer_id,
                        reason: reason.clone(),
                    }));
                }
                warn!("Payment {} rejected: {}", reference, reason);
                Ok(booking.clone())
            }
        }
    }

    fn apply_success(
        &self,
        booking: &mut Booking,
        reference: &str,
        gateway_transaction_id: String,
        amount: Decimal,
        redeemed: &Redeemed,
        now: DateTime<Utc>,
        effects: &mut Vec<SideEffect>,
    ) -> AppResult<Booking> {
        match booking.status() {
            BookingStatus::AwaitingPayment => {}
            BookingStatus::Expired | BookingStatus::Cancelled => {
                warn!(
                    "Payment {} captured for {} booking {}, refunding",
                    reference,
                    booking.status(),
                    booking.id
                );
                self.resolve_attempt(booking, PaymentStatus::Refunded, None, now);
                effects.push(SideEffect::Refund(self.refund_request(
                    booking,
                    reference,
                    gateway_transaction_id,
                    amount,
                    RefundReason::LateCapture,
                )));
                return Err(if booking.status() == BookingStatus::Expired {
                    AppError::HoldExpired(format!("booking {}", booking.id))
                } else {
                    AppError::InvalidTransition {
                        from: BookingStatus::Cancelled,
                        to: BookingStatus::Confirmed,
                    }
                });
            }
            other => {
                error!(
                    "Payment {} succeeded for booking {} in state {}",
                    reference, booking.id, other
                );
                return Err(AppError::InconsistentState(format!(
                    "booking {} is {} while a payment succeeded",
                    booking.id, other
                )));
            }
        }

        // Expiry wins a tie with a late payment
        if booking.hold_expired_at(now) {
            self.expire_locked(booking, now, effects)?;
            self.resolve_attempt(booking, PaymentStatus::Refunded, None, now);
            effects.push(SideEffect::Refund(self.refund_request(
                booking,
                reference,
                gateway_transaction_id,
                amount,
                RefundReason::LateCapture,
            )));
            return Err(AppError::HoldExpired(format!("booking {}", booking.id)));
        }

        let (Some(hold_id), Some(snapshot)) = (booking.hold_id, booking.pricing.clone()) else {
            return Err(AppError::InconsistentState(format!(
                "booking {} awaits payment without hold or price",
                booking.id
            )));
        };

        if amount != snapshot.breakdown.total_amount {
            error!(
                "Captured {} for booking {} but frozen total is {}",
                amount, booking.id, snapshot.breakdown.total_amount
            );
            self.holds.release_hold(hold_id)?;
            booking.transition_to(BookingStatus::Cancelled, now)?;
            self.resolve_attempt(booking, PaymentStatus::Refunded, None, now);
            effects.push(SideEffect::Refund(self.refund_request(
                booking,
                reference,
                gateway_transaction_id,
                amount,
                RefundReason::TechnicalError,
            )));
            effects.push(SideEffect::Notify(BookingEvent::PaymentFailed {
                booking_id: booking.id,
                customer_id: booking.customer_id,
                reason: "captured amount mismatch".to_string(),
            }));
            return Err(AppError::InconsistentState(format!(
                "captured amount {} differs from {}",
                amount, snapshot.breakdown.total_amount
            )));
        }

        booking.expect_status(&[BookingStatus::AwaitingPayment], BookingStatus::Confirmed)?;
        let booking_id = booking.id;
        let customer_id = booking.customer_id;
        let txid = gateway_transaction_id.clone();

        // Hold, slots, voucher and booking change together or not at all
        let committed = self.holds.confirm_hold_with(hold_id, || {
            if let Redeemed::Conflict(code) = redeemed {
                return Err(AppError::VoucherUnavailable(code.clone()));
            }
            self.redemptions
                .redeem(&snapshot, booking_id, customer_id, now)?;
            booking.tickets = snapshot
                .breakdown
                .tickets
                .iter()
                .map(Ticket::issue)
                .collect();
            booking.transition_to(BookingStatus::Confirmed, now)?;
            booking.paid_at = Some(now);
            if let Some(attempt) = booking.payment.as_mut() {
                attempt.status = PaymentStatus::Succeeded;
                attempt.gateway_transaction_id = Some(txid);
                attempt.resolved_at = Some(now);
            }
            Ok(())
        });

        match committed {
            Ok(_) => {
                info!(
                    "Booking {} confirmed with {} tickets, paid {}",
                    booking.id,
                    booking.tickets.len(),
                    amount
                );
                effects.push(SideEffect::AccruePoints {
                    booking_id: booking.id,
                    booking_code: booking.booking_code.clone(),
                    customer_id: booking.customer_id,
                    total: amount,
                });
                effects.push(SideEffect::Notify(BookingEvent::Confirmed {
                    booking_id: booking.id,
                    booking_code: booking.booking_code.clone(),
                    customer_id: booking.customer_id,
                    showtime_id: booking.showtime_id,
                    ticket_codes: booking.tickets.iter().map(|t| t.ticket_code.clone()).collect(),
                    total_amount: amount,
                }));
                Ok(booking.clone())
            }
            Err(AppError::HoldExpired(hold)) => {
                booking.transition_to(BookingStatus::Expired, now)?;
                self.resolve_attempt(booking, PaymentStatus::Refunded, None, now);
                effects.push(SideEffect::Refund(self.refund_request(
                    booking,
                    reference,
                    gateway_transaction_id,
                    amount,
                    RefundReason::LateCapture,
                )));
                effects.push(SideEffect::Notify(BookingEvent::Expired {
                    booking_id: booking.id,
                    customer_id: booking.customer_id,
                }));
                Err(AppError::HoldExpired(hold))
            }
            Err(AppError::VoucherUnavailable(code)) => {
                self.holds.release_hold(hold_id)?;
                booking.transition_to(BookingStatus::Cancelled, now)?;
                self.resolve_attempt(booking, PaymentStatus::Refunded, None, now);
                effects.push(SideEffect::Refund(self.refund_request(
                    booking,
                    reference,
                    gateway_transaction_id,
                    amount,
                    RefundReason::RedemptionConflict,
                )));
                effects.push(SideEffect::Notify(BookingEvent::PaymentFailed {
                    booking_id: booking.id,
                    customer_id: booking.customer_id,
                    reason: format!("voucher {} already used", code),
                }));
                Err(AppError::VoucherUnavailable(code))
            }
            Err(e) => {
                // Attempt stays pending so a redelivered callback can retry
                error!("Confirmation of booking {} failed: {}", booking.id, e);
                Err(e)
            }
        }
    }

    fn resolve_attempt(
        &self,
        booking: &mut Booking,
        status: PaymentStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) {
        if let Some(attempt) = booking.payment.as_mut() {
            attempt.status = status;
            attempt.failure_reason = reason;
            attempt.resolved_at = Some(now);
        }
    }

    fn refund_request(
        &self,
        booking: &Booking,
        reference: &str,
        gateway_transaction_id: String,
        amount: Decimal,
        reason: RefundReason,
    ) -> RefundRequest {
        RefundRequest {
            booking_id: booking.id,
            payment_reference: reference.to_string(),
            gateway_transaction_id,
            amount,
            currency: self.settings.currency.clone(),
            reason,
        }
    }

    /// Cancel a booking
    ///
    /// Before confirmation the hold is released immediately. A confirmed
    /// booking is refunded instead; its seats stay occupied.
    #[instrument(skip(self))]
    pub async fn cancel_booking(&self, booking_id: BookingId) -> AppResult<Booking> {
        let record = self.load_record(booking_id).await?;
        let mut effects = Vec::new();

        let result = {
            let mut booking = record.lock();
            let now = self.clock.now();
            if booking.status() == BookingStatus::Confirmed {
                None
            } else {
                Some(self.cancel_locked(&mut booking, now, &mut effects))
            }
        };

        match result {
            Some(result) => {
                self.run_effects(effects).await;
                result
            }
            None => self.refund_confirmed(booking_id).await,
        }
    }

    fn cancel_locked(
        &self,
        booking: &mut Booking,
        now: DateTime<Utc>,
        effects: &mut Vec<SideEffect>,
    ) -> AppResult<Booking> {
        booking.expect_status(
            &[
                BookingStatus::Draft,
                BookingStatus::Holding,
                BookingStatus::Priced,
                BookingStatus::AwaitingPayment,
            ],
            BookingStatus::Cancelled,
        )?;

        if let Some(hold_id) = booking.hold_id {
            self.holds.release_hold(hold_id)?;
        }
        booking.transition_to(BookingStatus::Cancelled, now)?;
        effects.push(SideEffect::Notify(BookingEvent::Cancelled {
            booking_id: booking.id,
            customer_id: booking.customer_id,
        }));
        Self::persist_settled(booking, effects);

        info!("Cancelled booking {}", booking.id);
        Ok(booking.clone())
    }

    async fn refund_confirmed(&self, booking_id: BookingId) -> AppResult<Booking> {
        let record = self.load_record(booking_id).await?;
        let showtime_id = record.lock().showtime_id;
        let showtime = self
            .catalog
            .find_showtime(showtime_id)
            .await?
            .ok_or_else(|| AppError::ShowtimeNotFound(showtime_id.to_string()))?;

        let request = {
            let mut booking = record.lock();
            let now = self.clock.now();
            self.prepare_refund(&mut booking, &showtime, now)?
        };

        match self.gateway.refund(&request).await {
            Ok(ack) => {
                let mut effects = Vec::new();
                let result = {
                    let mut booking = record.lock();
                    let now = self.clock.now();
                    booking.refund_in_flight = false;
                    booking.refund_reference = Some(ack.refund_reference.clone());
                    for ticket in booking.tickets.iter_mut() {
                        if ticket.status() == TicketStatus::Booked {
                            ticket.transition_to(TicketStatus::Refunded, now)?;
                        }
                    }
                    booking.transition_to(BookingStatus::Refunded, now)?;
                    effects.push(SideEffect::Notify(BookingEvent::Refunded {
                        booking_id,
                        customer_id: booking.customer_id,
                        amount: request.amount,
                    }));
                    Self::persist_settled(&booking, &mut effects);
                    booking.clone()
                };
                self.run_effects(effects).await;
                info!(
                    "Refunded booking {} (refund ref {})",
                    booking_id, ack.refund_reference
                );
                Ok(result)
            }
            Err(e) => {
                record.lock().refund_in_flight = false;
                error!("Refund of booking {} failed: {}", booking_id, e);
                Err(e)
            }
        }
    }

    fn prepare_refund(
        &self,
        booking: &mut Booking,
        showtime: &Showtime,
        now: DateTime<Utc>,
    ) -> AppResult<RefundRequest> {
        booking.expect_status(&[BookingStatus::Confirmed], BookingStatus::Refunded)?;
        if booking.refund_in_flight {
            return Err(AppError::Conflict(format!(
                "refund of booking {} already in progress",
                booking.id
            )));
        }
        if now > showtime.starts_at - self.settings.refund_cutoff {
            return Err(AppError::RefundWindowClosed(format!(
                "refunds close {} minutes before the show",
                self.settings.refund_cutoff.num_minutes()
            )));
        }
        if booking.tickets.iter().any(|t| t.status() == TicketStatus::CheckedIn) {
            return Err(AppError::Conflict(format!(
                "booking {} has checked-in tickets",
                booking.id
            )));
        }

        let attempt = booking
            .payment
            .as_ref()
            .filter(|p| p.status == PaymentStatus::Succeeded)
            .ok_or_else(|| {
                AppError::InconsistentState(format!("confirmed booking {} has no payment", booking.id))
            })?;
        let request = RefundRequest {
            booking_id: booking.id,
            payment_reference: attempt.reference.clone(),
            gateway_transaction_id: attempt.gateway_transaction_id.clone().unwrap_or_default(),
            amount: attempt.amount,
            currency: self.settings.currency.clone(),
            reason: RefundReason::CustomerRequest,
        };
        booking.refund_in_flight = true;
        Ok(request)
    }

    /// Mark a ticket of a confirmed booking as used
    #[instrument(skip(self))]
    pub async fn check_in(&self, booking_id: BookingId, ticket_code: &str) -> AppResult<Ticket> {
        let record = self.load_record(booking_id).await?;
        let ticket = {
            let mut booking = record.lock();
            let now = self.clock.now();

            if booking.status() != BookingStatus::Confirmed {
                return Err(AppError::Conflict(format!(
                    "booking {} is {}",
                    booking_id,
                    booking.status()
                )));
            }
            let ticket = booking
                .tickets
                .iter_mut()
                .find(|t| t.ticket_code == ticket_code)
                .ok_or_else(|| AppError::NotFound(format!("ticket {}", ticket_code)))?;
            ticket.transition_to(TicketStatus::CheckedIn, now)?;
            let ticket = ticket.clone();
            booking.updated_at = now;
            ticket
        };
        self.run_effects(vec![SideEffect::Persist(booking_id)]).await;

        info!("Checked in ticket {} of booking {}", ticket_code, booking_id);
        Ok(ticket)
    }

    /// Expire a booking whose hold has lapsed
    ///
    /// Returns `false` if the booking is unknown, already past the
    /// pre-confirmed states, or still within its deadline.
    #[instrument(skip(self))]
    pub async fn expire_booking(&self, booking_id: BookingId) -> AppResult<bool> {
        let Ok(record) = self.record(booking_id) else {
            return Ok(false);
        };
        let mut effects = Vec::new();

        let result = {
            let mut booking = record.lock();
            let now = self.clock.now();
            if booking.status().is_pre_confirmed() && booking.hold_expired_at(now) {
                self.expire_locked(&mut booking, now, &mut effects).map(|_| true)
            } else {
                Ok(false)
            }
        };
        self.run_effects(effects).await;
        result
    }

    /// Pre-confirmed bookings past their hold deadline
    pub fn overdue_bookings(&self, now: DateTime<Utc>) -> Vec<BookingId> {
        let records: Vec<_> = self.bookings.read().values().cloned().collect();
        records
            .iter()
            .filter_map(|record| {
                let booking = record.lock();
                (booking.status().is_pre_confirmed() && booking.hold_expired_at(now))
                    .then_some(booking.id)
            })
            .collect()
    }

    /// Drop cancelled and expired bookings closed before `older_than`
    pub fn purge_closed(&self, older_than: DateTime<Utc>) -> usize {
        let mut purged_refs = Vec::new();
        let purged = {
            let mut bookings = self.bookings.write();
            let before = bookings.len();
            bookings.retain(|_, record| {
                let booking = record.lock();
                let stale = matches!(
                    booking.status(),
                    BookingStatus::Cancelled | BookingStatus::Expired
                ) && booking.closed_at.map_or(false, |at| at < older_than);
                if stale {
                    if let Some(attempt) = &booking.payment {
                        purged_refs.push(attempt.reference.clone());
                    }
                }
                !stale
            });
            before - bookings.len()
        };

        if !purged_refs.is_empty() {
            let mut refs = self.payment_refs.write();
            for reference in purged_refs {
                refs.remove(&reference);
            }
        }
        purged
    }

    /// Write settled bookings of finished shows to the repository and drop
    /// them from memory, together with the showtime's seat arena
    ///
    /// A show is finished `evict_after_show` after it starts. Bookings that
    /// fail to save stay in memory for the next pass. An arena is kept while
    /// any booking of its showtime is still in memory.
    pub async fn evict_finished(&self, now: DateTime<Utc>) -> Eviction {
        let mut candidates: HashSet<ShowtimeId> = self
            .holds
            .inventory()
            .registered_showtimes()
            .into_iter()
            .collect();
        candidates.extend(
            self.bookings
                .read()
                .values()
                .map(|record| record.lock().showtime_id),
        );

        let mut finished = HashSet::new();
        for showtime_id in candidates {
            match self.showtime_start(showtime_id).await {
                Ok(Some(start)) if start + self.settings.evict_after_show <= now => {
                    finished.insert(showtime_id);
                }
                Ok(Some(_)) => {}
                // Gone from the catalog
                Ok(None) => {
                    finished.insert(showtime_id);
                }
                Err(e) => warn!("Start of showtime {} unavailable: {}", showtime_id, e),
            }
        }
        if finished.is_empty() {
            return Eviction::default();
        }

        let records: Vec<_> = self
            .bookings
            .read()
            .values()
            .filter(|record| finished.contains(&record.lock().showtime_id))
            .cloned()
            .collect();

        let mut eviction = Eviction::default();
        for record in records {
            let booking = record.lock().clone();
            if !booking.is_settled() {
                continue;
            }
            if let Err(e) = self.repository.save(&booking).await {
                warn!("Keeping booking {} in memory, save failed: {}", booking.id, e);
                continue;
            }
            self.bookings.write().remove(&booking.id);
            if let Some(attempt) = &booking.payment {
                self.payment_refs.write().remove(&attempt.reference);
            }
            eviction.bookings += 1;
        }

        let remaining: HashSet<ShowtimeId> = self
            .bookings
            .read()
            .values()
            .map(|record| record.lock().showtime_id)
            .collect();
        for showtime_id in finished {
            if remaining.contains(&showtime_id) {
                continue;
            }
            self.showtime_starts.write().remove(&showtime_id);
            if self.holds.inventory().unregister_showtime(showtime_id) {
                eviction.showtimes += 1;
            }
        }

        if eviction != Eviction::default() {
            info!(
                "Evicted {} bookings and {} showtimes of finished shows",
                eviction.bookings, eviction.showtimes
            );
        }
        eviction
    }

    /// Seat map of a showtime
    pub async fn seat_map(&self, showtime_id: ShowtimeId) -> AppResult<SeatMap> {
        if !self.holds.inventory().is_registered(showtime_id) {
            self.load_showtime(showtime_id).await?;
        }
        let inventory = self.holds.inventory();
        Ok(SeatMap {
            showtime_id,
            available: inventory.available_count(showtime_id)?,
            seats: inventory.seat_states(showtime_id)?,
        })
    }

    async fn run_effects(&self, effects: Vec<SideEffect>) {
        for effect in effects {
            match effect {
                SideEffect::Notify(event) => {
                    if let Err(e) = self.notifier.dispatch(&event).await {
                        warn!(
                            "Notification for booking {} failed: {}",
                            event.booking_id(),
                            e
                        );
                    }
                }
                SideEffect::AccruePoints {
                    booking_id,
                    booking_code,
                    customer_id,
                    total,
                } => {
                    self.accrue_points(booking_id, &booking_code, customer_id, total)
                        .await
                }
                SideEffect::Refund(request) => {
                    match self.gateway.refund(&request).await {
                        Ok(ack) => {
                            info!(
                                "Refund {} issued for booking {} ({})",
                                ack.refund_reference, request.booking_id, request.reason
                            );
                            if let Ok(record) = self.record(request.booking_id) {
                                let settled = {
                                    let mut booking = record.lock();
                                    booking.refund_reference = Some(ack.refund_reference);
                                    booking.updated_at = self.clock.now();
                                    booking.is_settled().then(|| booking.clone())
                                };
                                if let Some(booking) = settled {
                                    self.save_booking(&booking).await;
                                }
                            }
                        }
                        Err(e) => error!(
                            "Refund of {} for booking {} failed, needs manual follow-up: {}",
                            request.amount, request.booking_id, e
                        ),
                    }
                }
                SideEffect::Persist(booking_id) => {
                    let snapshot = self
                        .record(booking_id)
                        .ok()
                        .map(|record| record.lock().clone());
                    if let Some(booking) = snapshot {
                        self.save_booking(&booking).await;
                    }
                }
                SideEffect::Revoke(booking_id) => {
                    match self.store.revoke(booking_id).await {
                        Ok(()) => info!("Revoked redemption of unconfirmed booking {}", booking_id),
                        Err(e) => error!(
                            "Revoking redemption of booking {} failed, needs manual follow-up: {}",
                            booking_id, e
                        ),
                    }
                }
            }
        }
    }

    async fn save_booking(&self, booking: &Booking) {
        match self.repository.save(booking).await {
            Ok(()) => debug!("Saved booking {} ({})", booking.id, booking.status()),
            // Retried when the booking is evicted
            Err(e) => warn!("Saving booking {} failed: {}", booking.id, e),
        }
    }

    async fn accrue_points(
        &self,
        booking_id: BookingId,
        booking_code: &str,
        customer_id: CustomerId,
        total: Decimal,
    ) {
        let tier = match self.catalog.find_membership(customer_id).await {
            Ok(membership) => membership.map(|m| m.tier),
            Err(e) => {
                warn!("Membership lookup for customer {} failed: {}", customer_id, e);
                return;
            }
        };
        let points = PricingEngine::points_earned(
            total,
            self.settings.points_conversion_rate,
            tier.as_ref(),
        );
        if points <= 0 {
            return;
        }

        let entry =
            PointsTransaction::earn(customer_id, booking_id, booking_code, points, self.clock.now());
        match self.points.append(&entry).await {
            Ok(()) => debug!("Accrued {} points for customer {}", points, customer_id),
            Err(e) => warn!(
                "Points accrual for booking {} failed: {}",
                booking_id, e
            ),
        }
    }
}
