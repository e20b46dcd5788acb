//! In-memory collaborators
//!
//! Reference data, redemptions, settled bookings and the points ledger held
//! in process. Used by tests and for running the engine without PostgreSQL.

use async_trait::async_trait;
use cine_core::{
    models::{
        Booking, BookingId, BookingStatus, CustomerId, HallId, Membership, PointsTransaction,
        Promotion, Redemption, Seat, SeatId, SeatType, Showtime, ShowtimeId, SurchargeTable,
        Voucher, VoucherStatus,
    },
    traits::{BookingRepository, CatalogRepository, PointsLedger, RedemptionStore},
    AppError, AppResult,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct CatalogData {
    showtimes: HashMap<ShowtimeId, Showtime>,
    seats: HashMap<HallId, Vec<Seat>>,
    surcharges: SurchargeTable,
    promotions: HashMap<i32, Promotion>,
    vouchers: HashMap<String, Voucher>,
    memberships: HashMap<CustomerId, Membership>,
    usage: HashMap<(i32, CustomerId), i32>,
    redemptions: HashMap<BookingId, Redemption>,
}

/// `CatalogRepository` and `RedemptionStore` over in-process maps
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    data: RwLock<CatalogData>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_showtime(&self, showtime: Showtime) {
        self.data.write().showtimes.insert(showtime.id, showtime);
    }

    /// Seats of a hall; kept sorted by ID
    pub fn add_seats(&self, hall_id: HallId, seats: Vec<Seat>) {
        let mut data = self.data.write();
        let hall = data.seats.entry(hall_id).or_default();
        hall.extend(seats);
        hall.sort_by_key(|s| s.id);
    }

    pub fn set_surcharge(&self, seat_type: SeatType, amount: Decimal) {
        self.data.write().surcharges.insert(seat_type, amount);
    }

    pub fn add_promotion(&self, promotion: Promotion) {
        self.data.write().promotions.insert(promotion.id, promotion);
    }

    pub fn add_voucher(&self, voucher: Voucher) {
        self.data
            .write()
            .vouchers
            .insert(voucher.code.clone(), voucher);
    }

    pub fn add_membership(&self, membership: Membership) {
        self.data
            .write()
            .memberships
            .insert(membership.customer_id, membership);
    }

    /// Redemptions recorded before this process started
    pub fn set_customer_usage(&self, promotion_id: i32, customer_id: CustomerId, count: i32) {
        self.data
            .write()
            .usage
            .insert((promotion_id, customer_id), count);
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalog {
    async fn find_showtime(&self, id: ShowtimeId) -> AppResult<Option<Showtime>> {
        Ok(self.data.read().showtimes.get(&id).cloned())
    }

    async fn find_seats_by_hall(&self, hall_id: HallId) -> AppResult<Vec<Seat>> {
        Ok(self
            .data
            .read()
            .seats
            .get(&hall_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn seat_surcharges(&self) -> AppResult<SurchargeTable> {
        Ok(self.data.read().surcharges.clone())
    }

    async fn find_promotion_by_code(&self, code: &str) -> AppResult<Option<Promotion>> {
        Ok(self
            .data
            .read()
            .promotions
            .values()
            .find(|p| p.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn find_promotion(&self, id: i32) -> AppResult<Option<Promotion>> {
        Ok(self.data.read().promotions.get(&id).cloned())
    }

    async fn find_voucher_by_code(&self, code: &str) -> AppResult<Option<Voucher>> {
        Ok(self.data.read().vouchers.get(code).cloned())
    }

    async fn find_membership(&self, customer_id: CustomerId) -> AppResult<Option<Membership>> {
        Ok(self.data.read().memberships.get(&customer_id).cloned())
    }

    async fn count_customer_promotion_usage(
        &self,
        promotion_id: i32,
        customer_id: CustomerId,
    ) -> AppResult<i32> {
        Ok(self
            .data
            .read()
            .usage
            .get(&(promotion_id, customer_id))
            .copied()
            .unwrap_or(0))
    }
}

#[async_trait]
impl RedemptionStore for InMemoryCatalog {
    async fn redeem(&self, redemption: &Redemption) -> AppResult<()> {
        let mut data = self.data.write();
        if data.redemptions.contains_key(&redemption.booking_id) {
            return Ok(());
        }

        if let Some(code) = &redemption.voucher_code {
            let voucher = data
                .vouchers
                .get_mut(code)
                .filter(|v| v.status == VoucherStatus::Available)
                .ok_or_else(|| {
                    warn!(
                        "Voucher {} not available for booking {}",
                        code, redemption.booking_id
                    );
                    AppError::VoucherUnavailable(code.clone())
                })?;
            voucher.status = VoucherStatus::Used;
        }

        if let Some(promotion_id) = redemption.promotion_id {
            if let Some(promotion) = data.promotions.get_mut(&promotion_id) {
                promotion.current_usage += 1;
            }
            *data
                .usage
                .entry((promotion_id, redemption.customer_id))
                .or_insert(0) += 1;
        }

        data.redemptions
            .insert(redemption.booking_id, redemption.clone());
        debug!("Recorded redemption for booking {}", redemption.booking_id);
        Ok(())
    }

    async fn revoke(&self, booking_id: BookingId) -> AppResult<()> {
        let mut data = self.data.write();
        let Some(redemption) = data.redemptions.remove(&booking_id) else {
            return Ok(());
        };

        if let Some(code) = &redemption.voucher_code {
            if let Some(voucher) = data.vouchers.get_mut(code) {
                voucher.status = VoucherStatus::Available;
            }
        }
        if let Some(promotion_id) = redemption.promotion_id {
            if let Some(promotion) = data.promotions.get_mut(&promotion_id) {
                promotion.current_usage = (promotion.current_usage - 1).max(0);
            }
            if let Some(count) = data.usage.get_mut(&(promotion_id, redemption.customer_id)) {
                *count = (*count - 1).max(0);
            }
        }
        debug!("Revoked redemption of booking {}", booking_id);
        Ok(())
    }
}

/// `BookingRepository` kept in memory
#[derive(Debug, Default)]
pub struct InMemoryBookingStore {
    bookings: RwLock<HashMap<BookingId, Booking>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bookings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.read().is_empty()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingStore {
    async fn save(&self, booking: &Booking) -> AppResult<()> {
        let mut bookings = self.bookings.write();
        match bookings.get(&booking.id) {
            Some(stored) if stored.updated_at > booking.updated_at => {
                debug!("Skipped stale snapshot of booking {}", booking.id);
            }
            _ => {
                bookings.insert(booking.id, booking.clone());
            }
        }
        Ok(())
    }

    async fn find(&self, id: BookingId) -> AppResult<Option<Booking>> {
        Ok(self.bookings.read().get(&id).cloned())
    }

    async fn find_by_code(&self, booking_code: &str) -> AppResult<Option<Booking>> {
        Ok(self
            .bookings
            .read()
            .values()
            .find(|b| b.booking_code == booking_code)
            .cloned())
    }

    async fn find_by_payment_reference(&self, reference: &str) -> AppResult<Option<Booking>> {
        Ok(self
            .bookings
            .read()
            .values()
            .find(|b| b.payment.as_ref().map_or(false, |p| p.reference == reference))
            .cloned())
    }

    async fn find_by_customer(&self, customer_id: CustomerId) -> AppResult<Vec<Booking>> {
        let mut found: Vec<Booking> = self
            .bookings
            .read()
            .values()
            .filter(|b| b.customer_id == customer_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn sold_seats(&self, showtime_id: ShowtimeId) -> AppResult<Vec<SeatId>> {
        let mut seats: Vec<SeatId> = self
            .bookings
            .read()
            .values()
            .filter(|b| {
                b.showtime_id == showtime_id
                    && matches!(b.status(), BookingStatus::Confirmed | BookingStatus::Refunded)
            })
            .flat_map(|b| b.seat_ids.iter().copied())
            .collect();
        seats.sort_unstable();
        Ok(seats)
    }
}

/// Append-only points ledger kept in memory
#[derive(Debug, Default)]
pub struct InMemoryPointsLedger {
    entries: RwLock<Vec<PointsTransaction>>,
}

impl InMemoryPointsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<PointsTransaction> {
        self.entries.read().clone()
    }

    /// Sum of points credited to a customer
    pub fn balance(&self, customer_id: CustomerId) -> i64 {
        self.entries
            .read()
            .iter()
            .filter(|e| e.customer_id == customer_id)
            .map(|e| e.points)
            .sum()
    }
}

#[async_trait]
impl PointsLedger for InMemoryPointsLedger {
    async fn append(&self, entry: &PointsTransaction) -> AppResult<()> {
        self.entries.write().push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat(id: i32, hall_id: HallId) -> Seat {
        Seat {
            id,
            hall_id,
            row: "A".to_string(),
            number: id,
            seat_type: SeatType::Standard,
        }
    }

    #[tokio::test]
    async fn test_seats_sorted_by_id() {
        let catalog = InMemoryCatalog::new();
        catalog.add_seats(1, vec![seat(3, 1), seat(1, 1)]);
        catalog.add_seats(1, vec![seat(2, 1)]);

        let ids: Vec<_> = catalog
            .find_seats_by_hall(1)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(catalog.find_seats_by_hall(2).await.unwrap().is_empty());
    }

    fn voucher(code: &str) -> Voucher {
        Voucher {
            id: 1,
            code: code.to_string(),
            promotion_id: 7,
            customer_id: None,
            status: VoucherStatus::Available,
            expires_at: None,
        }
    }

    fn redemption(booking_id: BookingId, customer_id: CustomerId) -> Redemption {
        Redemption {
            booking_id,
            customer_id,
            promotion_id: Some(7),
            voucher_code: Some("VC-1".to_string()),
            discount_amount: Decimal::from(10000),
            redeemed_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_voucher_redeemed_once_and_revocable() {
        let catalog = InMemoryCatalog::new();
        catalog.add_voucher(voucher("VC-1"));
        let first = uuid::Uuid::new_v4();
        let second = uuid::Uuid::new_v4();

        catalog.redeem(&redemption(first, 1)).await.unwrap();
        // Redelivery for the same booking changes nothing
        catalog.redeem(&redemption(first, 1)).await.unwrap();
        assert_eq!(catalog.count_customer_promotion_usage(7, 1).await.unwrap(), 1);

        let err = catalog.redeem(&redemption(second, 2)).await.unwrap_err();
        assert!(matches!(err, AppError::VoucherUnavailable(_)));
        let stored = catalog.find_voucher_by_code("VC-1").await.unwrap().unwrap();
        assert_eq!(stored.status, VoucherStatus::Used);
        assert_eq!(catalog.count_customer_promotion_usage(7, 2).await.unwrap(), 0);

        catalog.revoke(first).await.unwrap();
        let stored = catalog.find_voucher_by_code("VC-1").await.unwrap().unwrap();
        assert_eq!(stored.status, VoucherStatus::Available);
        assert_eq!(catalog.count_customer_promotion_usage(7, 1).await.unwrap(), 0);
        catalog.redeem(&redemption(second, 2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_booking_store_keeps_newest_snapshot() {
        let store = InMemoryBookingStore::new();
        let now = chrono::Utc::now();
        let mut booking = Booking::draft(uuid::Uuid::new_v4(), 3, 9, vec![4, 5], now);
        booking.restore_status(BookingStatus::Confirmed);
        booking.updated_at = now + chrono::Duration::seconds(10);
        store.save(&booking).await.unwrap();

        let mut stale = booking.clone();
        stale.restore_status(BookingStatus::AwaitingPayment);
        stale.updated_at = now;
        store.save(&stale).await.unwrap();

        let stored = store.find(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), BookingStatus::Confirmed);
        assert_eq!(store.sold_seats(3).await.unwrap(), vec![4, 5]);
        assert!(store.sold_seats(4).await.unwrap().is_empty());
        assert_eq!(
            store
                .find_by_code(&booking.booking_code)
                .await
                .unwrap()
                .map(|b| b.id),
            Some(booking.id)
        );
        assert_eq!(store.find_by_customer(9).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_balance() {
        let ledger = InMemoryPointsLedger::new();
        let now = chrono::Utc::now();
        let booking = uuid::Uuid::new_v4();
        ledger
            .append(&PointsTransaction::earn(1, booking, "BK1", 300, now))
            .await
            .unwrap();
        ledger
            .append(&PointsTransaction::earn(2, booking, "BK2", 50, now))
            .await
            .unwrap();

        assert_eq!(ledger.balance(1), 300);
        assert_eq!(ledger.entries().len(), 2);
    }
}
