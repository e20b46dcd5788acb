//! Hold manager service
//!
//! Owns the lifecycle of seat holds:
//! - Create holds with a TTL, claiming slots in the seat inventory
//! - Extend holds up to a maximum total duration
//! - Confirm holds into permanent occupancy
//! - Release and expire holds, returning their slots
//!
//! Deadlines are always compared against the injected clock. Once
//! `now > expires_at` the hold is expired for every purpose, whether or not
//! the sweeper has visited it yet.

use cine_core::{
    models::{BookingId, HoldId, HoldStatus, SeatHold, SeatId, ShowtimeId},
    AppError, AppResult, Clock,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::seat_inventory::{Occupancy, Occupant, SeatInventory};

/// Hold manager
pub struct HoldManager {
    inventory: Arc<SeatInventory>,
    holds: RwLock<HashMap<HoldId, Arc<Mutex<SeatHold>>>>,
    clock: Arc<dyn Clock>,
    max_hold_duration: Duration,
}

impl HoldManager {
    /// Create a new hold manager
    pub fn new(
        inventory: Arc<SeatInventory>,
        clock: Arc<dyn Clock>,
        max_hold_duration: Duration,
    ) -> Self {
        Self {
            inventory,
            holds: RwLock::new(HashMap::new()),
            clock,
            max_hold_duration,
        }
    }

    pub fn inventory(&self) -> &Arc<SeatInventory> {
        &self.inventory
    }

    fn record(&self, hold_id: HoldId) -> Option<Arc<Mutex<SeatHold>>> {
        self.holds.read().get(&hold_id).cloned()
    }

    /// Snapshot of a hold
    pub fn get_hold(&self, hold_id: HoldId) -> Option<SeatHold> {
        self.record(hold_id).map(|h| h.lock().clone())
    }

    /// Hold seats for `ttl`
    ///
    /// # Arguments
    ///
    /// * `showtime_id` - Showtime whose slots are claimed
    /// * `seat_ids` - Seats to hold; must be non-empty and free of duplicates
    /// * `owner` - Booking the hold belongs to
    /// * `ttl` - Time until the hold expires
    ///
    /// # Errors
    ///
    /// Returns `SeatUnavailable` listing every seat that is taken. Nothing is
    /// held in that case.
    #[instrument(skip(self, seat_ids), fields(seats = seat_ids.len()))]
    pub fn create_hold(
        &self,
        showtime_id: ShowtimeId,
        seat_ids: &[SeatId],
        owner: BookingId,
        ttl: Duration,
    ) -> AppResult<SeatHold> {
        if seat_ids.is_empty() {
            return Err(AppError::InvalidInput("no seats requested".to_string()));
        }
        let mut unique = seat_ids.to_vec();
        unique.sort_unstable();
        unique.dedup();
        if unique.len() != seat_ids.len() {
            return Err(AppError::InvalidInput(
                "duplicate seat in request".to_string(),
            ));
        }
        if ttl <= Duration::zero() || ttl > self.max_hold_duration {
            return Err(AppError::InvalidInput(format!(
                "hold ttl must be between 1 and {} seconds",
                self.max_hold_duration.num_seconds()
            )));
        }

        let now = self.clock.now();
        let hold = SeatHold::new(showtime_id, unique, owner, now, ttl);

        let mut outcome = self.inventory.occupy(showtime_id, &hold.seat_ids, hold.id)?;

        // Holds past their deadline lose to a fresh request even before the
        // sweeper reaches them
        let mut reclaimed = 0;
        if let Occupancy::Conflicted(conflicts) = &outcome {
            for conflict in conflicts {
                if let Occupant::Held(blocking) = conflict.occupant {
                    if self.reclaim(blocking, now)? {
                        reclaimed += 1;
                    }
                }
            }
        }
        if reclaimed > 0 {
            debug!("Reclaimed {} lapsed holds, retrying occupy", reclaimed);
            outcome = self.inventory.occupy(showtime_id, &hold.seat_ids, hold.id)?;
        }

        match outcome {
            Occupancy::Acquired => {
                self.holds
                    .write()
                    .insert(hold.id, Arc::new(Mutex::new(hold.clone())));
                info!(
                    "Created hold {} for booking {} on showtime {}: seats {:?} until {}",
                    hold.id, owner, showtime_id, hold.seat_ids, hold.expires_at
                );
                Ok(hold)
            }
            Occupancy::Conflicted(conflicts) => {
                let seat_ids: Vec<SeatId> = conflicts.iter().map(|c| c.seat_id).collect();
                warn!(
                    "Hold for booking {} rejected, seats unavailable: {:?}",
                    owner, seat_ids
                );
                Err(AppError::SeatUnavailable { seat_ids })
            }
        }
    }

    /// Free slots of a hold that is past its deadline or already terminal
    fn reclaim(&self, hold_id: HoldId, now: DateTime<Utc>) -> AppResult<bool> {
        let Some(record) = self.record(hold_id) else {
            return Ok(false);
        };
        let mut hold = record.lock();

        match hold.status() {
            HoldStatus::Active if hold.is_expired_at(now) => {
                self.inventory
                    .release(hold.showtime_id, &hold.seat_ids, hold.id)?;
                hold.transition_to(HoldStatus::Expired, now)?;
                info!("Expired lapsed hold {} on contention", hold.id);
                Ok(true)
            }
            HoldStatus::Active | HoldStatus::Consumed => Ok(false),
            HoldStatus::Expired | HoldStatus::Released => {
                let freed = self
                    .inventory
                    .release(hold.showtime_id, &hold.seat_ids, hold.id)?;
                Ok(freed > 0)
            }
        }
    }

    /// Push the deadline of an active hold back by `extra`
    ///
    /// # Errors
    ///
    /// - `HoldExpired` if the hold is no longer live
    /// - `HoldExtensionLimit` if the new deadline would exceed the maximum
    ///   hold duration measured from creation
    #[instrument(skip(self))]
    pub fn extend_hold(&self, hold_id: HoldId, extra: Duration) -> AppResult<SeatHold> {
        if extra <= Duration::zero() {
            return Err(AppError::InvalidInput(
                "extension must be positive".to_string(),
            ));
        }
        let record = self
            .record(hold_id)
            .ok_or_else(|| AppError::HoldNotFound(hold_id.to_string()))?;
        let mut hold = record.lock();
        let now = self.clock.now();

        if !hold.is_live_at(now) {
            return Err(AppError::HoldExpired(hold_id.to_string()));
        }

        let new_deadline = hold.expires_at + extra;
        if new_deadline - hold.created_at > self.max_hold_duration {
            return Err(AppError::HoldExtensionLimit {
                max_secs: self.max_hold_duration.num_seconds(),
            });
        }

        hold.expires_at = new_deadline;
        info!("Extended hold {} until {}", hold_id, new_deadline);
        Ok(hold.clone())
    }

    /// Confirm an active hold
    pub fn confirm_hold(&self, hold_id: HoldId) -> AppResult<SeatHold> {
        self.confirm_hold_with(hold_id, || Ok(())).map(|(hold, _)| hold)
    }

    /// Confirm an active hold, running `commit` inside the same critical
    /// section as the slot conversion
    ///
    /// The deadline check is the first thing done under the hold's lock. A
    /// hold found past its deadline is expired and its slots released.
    #[instrument(skip(self, commit))]
    pub fn confirm_hold_with<T, F>(&self, hold_id: HoldId, commit: F) -> AppResult<(SeatHold, T)>
    where
        F: FnOnce() -> AppResult<T>,
    {
        let record = self
            .record(hold_id)
            .ok_or_else(|| AppError::HoldNotFound(hold_id.to_string()))?;
        let mut hold = record.lock();
        let now = self.clock.now();

        match hold.status() {
            HoldStatus::Active => {}
            HoldStatus::Consumed => {
                error!("Hold {} confirmed twice", hold_id);
                return Err(AppError::InconsistentState(format!(
                    "hold {} is already consumed",
                    hold_id
                )));
            }
            HoldStatus::Expired => return Err(AppError::HoldExpired(hold_id.to_string())),
            HoldStatus::Released => {
                return Err(AppError::Conflict(format!(
                    "hold {} was released",
                    hold_id
                )))
            }
        }

        if hold.is_expired_at(now) {
            self.inventory
                .release(hold.showtime_id, &hold.seat_ids, hold.id)?;
            hold.transition_to(HoldStatus::Expired, now)?;
            warn!(
                "Hold {} expired at {} before confirmation at {}",
                hold_id, hold.expires_at, now
            );
            return Err(AppError::HoldExpired(hold_id.to_string()));
        }

        let value =
            self.inventory
                .confirm_with(hold.showtime_id, &hold.seat_ids, hold.id, commit)?;
        hold.transition_to(HoldStatus::Consumed, now)?;

        info!("Confirmed hold {} for booking {}", hold_id, hold.owner);
        Ok((hold.clone(), value))
    }

    /// Release an active hold
    ///
    /// Returns `false` without side effects when the hold is unknown or
    /// already terminal.
    #[instrument(skip(self))]
    pub fn release_hold(&self, hold_id: HoldId) -> AppResult<bool> {
        let Some(record) = self.record(hold_id) else {
            warn!("Hold {} not found, skipping release", hold_id);
            return Ok(false);
        };
        let mut hold = record.lock();

        if hold.status() != HoldStatus::Active {
            debug!(
                "Hold {} is already {}, skipping release",
                hold_id,
                hold.status()
            );
            return Ok(false);
        }

        let freed = self
            .inventory
            .release(hold.showtime_id, &hold.seat_ids, hold.id)?;
        hold.transition_to(HoldStatus::Released, self.clock.now())?;

        info!("Released hold {}: {} seats freed", hold_id, freed);
        Ok(true)
    }

    /// Expire a hold whose deadline has passed
    ///
    /// Returns the expired hold, or `None` if it was not active or is still
    /// within its deadline.
    #[instrument(skip(self))]
    pub fn expire_hold(&self, hold_id: HoldId) -> AppResult<Option<SeatHold>> {
        let Some(record) = self.record(hold_id) else {
            return Ok(None);
        };
        let mut hold = record.lock();
        let now = self.clock.now();

        if hold.status() != HoldStatus::Active || !hold.is_expired_at(now) {
            return Ok(None);
        }

        self.inventory
            .release(hold.showtime_id, &hold.seat_ids, hold.id)?;
        hold.transition_to(HoldStatus::Expired, now)?;

        info!("Expired hold {} of booking {}", hold_id, hold.owner);
        Ok(Some(hold.clone()))
    }

    /// Active holds past their deadline at `now`
    pub fn expired_holds(&self, now: DateTime<Utc>) -> Vec<HoldId> {
        let records: Vec<Arc<Mutex<SeatHold>>> = self.holds.read().values().cloned().collect();
        records
            .iter()
            .filter_map(|record| {
                let hold = record.lock();
                (hold.status() == HoldStatus::Active && hold.is_expired_at(now)).then_some(hold.id)
            })
            .collect()
    }

    /// Number of active holds
    pub fn active_count(&self) -> usize {
        self.holds
            .read()
            .values()
            .filter(|record| record.lock().status() == HoldStatus::Active)
            .count()
    }

    /// Drop terminal holds finalized before `older_than`
    pub fn purge_terminal(&self, older_than: DateTime<Utc>) -> usize {
        let mut holds = self.holds.write();
        let before = holds.len();
        holds.retain(|_, record| {
            let hold = record.lock();
            !(hold.status().is_final()
                && hold.finalized_at.map_or(false, |at| at < older_than))
        });
        before - holds.len()
    }
}
