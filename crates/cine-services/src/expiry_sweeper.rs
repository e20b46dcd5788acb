//! Expiry sweeper
//!
//! Periodically expires lapsed holds and the bookings that own them, purges
//! old terminal records, and evicts settled bookings of finished shows. Correctness never depends on the sweeper:
//! every operation checks deadlines itself. The sweeper only bounds how long
//! a lapsed hold keeps its seats out of the seat map.

use chrono::Duration;
use cine_core::Clock;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::booking_engine::BookingEngine;

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub holds_expired: usize,
    pub bookings_expired: usize,
    pub holds_purged: usize,
    pub bookings_purged: usize,
    pub bookings_evicted: usize,
    pub showtimes_evicted: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Background expiry task
pub struct ExpirySweeper {
    engine: Arc<BookingEngine>,
    clock: Arc<dyn Clock>,
    period: std::time::Duration,
    retention: Duration,
}

impl ExpirySweeper {
    pub fn new(
        engine: Arc<BookingEngine>,
        clock: Arc<dyn Clock>,
        period: std::time::Duration,
        retention: Duration,
    ) -> Self {
        Self {
            engine,
            clock,
            period,
            retention,
        }
    }

    /// Run one pass
    ///
    /// Holds are expired first, then any booking still inside the
    /// pre-confirmed states with a lapsed deadline (for instance one whose
    /// hold was reclaimed by a competing request).
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = self.clock.now();
        let holds = self.engine.holds();

        for hold_id in holds.expired_holds(now) {
            match holds.expire_hold(hold_id) {
                Ok(Some(hold)) => {
                    report.holds_expired += 1;
                    match self.engine.expire_booking(hold.owner).await {
                        Ok(true) => report.bookings_expired += 1,
                        Ok(false) => {}
                        Err(e) => error!("Failed to expire booking {}: {}", hold.owner, e),
                    }
                }
                Ok(None) => {}
                Err(e) => error!("Failed to expire hold {}: {}", hold_id, e),
            }
        }

        for booking_id in self.engine.overdue_bookings(now) {
            match self.engine.expire_booking(booking_id).await {
                Ok(true) => report.bookings_expired += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to expire booking {}: {}", booking_id, e),
            }
        }

        let horizon = now - self.retention;
        report.holds_purged = holds.purge_terminal(horizon);
        report.bookings_purged = self.engine.purge_closed(horizon);

        let eviction = self.engine.evict_finished(now).await;
        report.bookings_evicted = eviction.bookings;
        report.showtimes_evicted = eviction.showtimes;

        if report.is_empty() {
            debug!("Sweep found nothing to do");
        } else {
            info!(
                "Sweep expired {} holds and {} bookings, purged {} holds and {} bookings",
                report.holds_expired,
                report.bookings_expired,
                report.holds_purged,
                report.bookings_purged
            );
        }
        report
    }

    /// Sweep every period until `shutdown` is cancelled
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Expiry sweeper started, period {:?}", self.period);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                }
            }

            info!("Expiry sweeper stopped");
        })
    }
}
