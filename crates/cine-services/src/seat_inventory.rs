//! Seat inventory
//!
//! Source of truth for slot occupancy. Every showtime gets an arena of slot
//! records addressed by index, each guarded by its own lock, so contention is
//! limited to requests that actually overlap.
//!
//! Multi-seat operations lock their slots in ascending seat-id order with a
//! bounded wait. Two requests sharing seats therefore never deadlock; a
//! request that cannot get a slot in time fails with a conflict instead of
//! blocking.

use cine_core::{
    models::{HoldId, SeatAvailability, SeatId, SeatState, ShowtimeId},
    AppError, AppResult,
};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Occupancy of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Held(HoldId),
    Booked(HoldId),
}

/// Who blocks a seat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupant {
    /// Held by another active (or not yet swept) hold
    Held(HoldId),
    /// Permanently occupied by a confirmed booking
    Booked,
}

/// A seat that could not be occupied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotConflict {
    pub seat_id: SeatId,
    pub occupant: Occupant,
}

/// Result of an occupy attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occupancy {
    /// Every slot now belongs to the hold
    Acquired,
    /// Nothing changed; these seats were taken
    Conflicted(Vec<SlotConflict>),
}

/// Slot records of one showtime
struct SlotArena {
    showtime_id: ShowtimeId,
    /// seat id -> slot index; indices follow ascending seat id
    index: HashMap<SeatId, usize>,
    seat_ids: Vec<SeatId>,
    slots: Vec<Mutex<Slot>>,
    held: AtomicUsize,
    booked: AtomicUsize,
}

impl SlotArena {
    fn new(showtime_id: ShowtimeId, mut seat_ids: Vec<SeatId>, sold: &[SeatId]) -> Self {
        seat_ids.sort_unstable();
        seat_ids.dedup();
        let index = seat_ids
            .iter()
            .enumerate()
            .map(|(i, seat_id)| (*seat_id, i))
            .collect();
        // Sold before this arena existed; no live hold owns them
        let slots: Vec<_> = seat_ids
            .iter()
            .map(|seat_id| {
                if sold.contains(seat_id) {
                    Mutex::new(Slot::Booked(HoldId::nil()))
                } else {
                    Mutex::new(Slot::Free)
                }
            })
            .collect();
        let booked = slots
            .iter()
            .filter(|slot| matches!(*slot.lock(), Slot::Booked(_)))
            .count();

        Self {
            showtime_id,
            index,
            seat_ids,
            slots,
            held: AtomicUsize::new(0),
            booked: AtomicUsize::new(booked),
        }
    }

    fn total(&self) -> usize {
        self.slots.len()
    }
}

/// Per-showtime seat occupancy
pub struct SeatInventory {
    showtimes: RwLock<HashMap<ShowtimeId, Arc<SlotArena>>>,
    lock_timeout: Duration,
}

impl SeatInventory {
    /// Create an empty inventory
    ///
    /// `lock_timeout` bounds the wait on any single slot lock.
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            showtimes: RwLock::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// Build the slot arena of a showtime. Later calls are no-ops.
    pub fn register_showtime(&self, showtime_id: ShowtimeId, seat_ids: Vec<SeatId>) {
        self.register_showtime_with_sold(showtime_id, seat_ids, &[]);
    }

    /// Build the slot arena with `sold` seats already booked
    ///
    /// Returns `false` if the showtime was registered already; its slots are
    /// left untouched in that case.
    pub fn register_showtime_with_sold(
        &self,
        showtime_id: ShowtimeId,
        seat_ids: Vec<SeatId>,
        sold: &[SeatId],
    ) -> bool {
        if self.showtimes.read().contains_key(&showtime_id) {
            return false;
        }

        let mut showtimes = self.showtimes.write();
        if showtimes.contains_key(&showtime_id) {
            return false;
        }
        let arena = SlotArena::new(showtime_id, seat_ids, sold);
        info!(
            "Registered showtime {} with {} seats ({} sold)",
            showtime_id,
            arena.total(),
            arena.booked.load(Ordering::Acquire)
        );
        showtimes.insert(showtime_id, Arc::new(arena));
        true
    }

    /// Drop the slot arena of a showtime that no longer sells seats
    pub fn unregister_showtime(&self, showtime_id: ShowtimeId) -> bool {
        let removed = self.showtimes.write().remove(&showtime_id).is_some();
        if removed {
            info!("Unregistered showtime {}", showtime_id);
        }
        removed
    }

    /// Showtimes with a live slot arena
    pub fn registered_showtimes(&self) -> Vec<ShowtimeId> {
        self.showtimes.read().keys().copied().collect()
    }

    pub fn is_registered(&self, showtime_id: ShowtimeId) -> bool {
        self.showtimes.read().contains_key(&showtime_id)
    }

    fn arena(&self, showtime_id: ShowtimeId) -> AppResult<Arc<SlotArena>> {
        self.showtimes
            .read()
            .get(&showtime_id)
            .cloned()
            .ok_or_else(|| AppError::ShowtimeNotFound(showtime_id.to_string()))
    }

    /// Lock the requested slots in ascending index order
    fn lock_slots<'a>(
        &self,
        arena: &'a SlotArena,
        seat_ids: &[SeatId],
    ) -> AppResult<Vec<(SeatId, MutexGuard<'a, Slot>)>> {
        let mut indices = Vec::with_capacity(seat_ids.len());
        for seat_id in seat_ids {
            let idx = arena.index.get(seat_id).copied().ok_or_else(|| {
                AppError::SeatNotFound(format!(
                    "seat {} in showtime {}",
                    seat_id, arena.showtime_id
                ))
            })?;
            indices.push(idx);
        }
        indices.sort_unstable();
        indices.dedup();

        let mut guards = Vec::with_capacity(indices.len());
        for idx in indices {
            let guard = arena.slots[idx]
                .try_lock_for(self.lock_timeout)
                .ok_or_else(|| {
                    warn!(
                        "Timed out locking seat {} of showtime {}",
                        arena.seat_ids[idx], arena.showtime_id
                    );
                    AppError::Conflict(format!(
                        "seat {} is busy, retry",
                        arena.seat_ids[idx]
                    ))
                })?;
            guards.push((arena.seat_ids[idx], guard));
        }
        Ok(guards)
    }

    /// Claim every slot for `hold_id`, or none of them
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The showtime is not registered or a seat does not belong to it
    /// - A slot lock could not be acquired within the bounded wait
    #[instrument(skip(self, seat_ids), fields(seats = seat_ids.len()))]
    pub fn occupy(
        &self,
        showtime_id: ShowtimeId,
        seat_ids: &[SeatId],
        hold_id: HoldId,
    ) -> AppResult<Occupancy> {
        if seat_ids.is_empty() {
            return Err(AppError::InvalidInput("no seats requested".to_string()));
        }

        let arena = self.arena(showtime_id)?;
        let mut guards = self.lock_slots(&arena, seat_ids)?;

        let conflicts: Vec<SlotConflict> = guards
            .iter()
            .filter_map(|(seat_id, slot)| match **slot {
                Slot::Free => None,
                Slot::Held(owner) if owner == hold_id => None,
                Slot::Held(owner) => Some(SlotConflict {
                    seat_id: *seat_id,
                    occupant: Occupant::Held(owner),
                }),
                Slot::Booked(_) => Some(SlotConflict {
                    seat_id: *seat_id,
                    occupant: Occupant::Booked,
                }),
            })
            .collect();

        if !conflicts.is_empty() {
            debug!(
                "Occupy for hold {} conflicted on {} seats",
                hold_id,
                conflicts.len()
            );
            return Ok(Occupancy::Conflicted(conflicts));
        }

        for (_, slot) in guards.iter_mut() {
            if **slot == Slot::Free {
                **slot = Slot::Held(hold_id);
                arena.held.fetch_add(1, Ordering::AcqRel);
            }
        }

        Ok(Occupancy::Acquired)
    }

    /// Atomically claim all seats or report the ones already taken
    pub fn try_occupy(
        &self,
        showtime_id: ShowtimeId,
        seat_ids: &[SeatId],
        hold_id: HoldId,
    ) -> AppResult<()> {
        match self.occupy(showtime_id, seat_ids, hold_id)? {
            Occupancy::Acquired => Ok(()),
            Occupancy::Conflicted(conflicts) => Err(AppError::SeatUnavailable {
                seat_ids: conflicts.into_iter().map(|c| c.seat_id).collect(),
            }),
        }
    }

    /// Turn the hold's slots into permanent occupancy
    pub fn confirm(
        &self,
        showtime_id: ShowtimeId,
        seat_ids: &[SeatId],
        hold_id: HoldId,
    ) -> AppResult<()> {
        self.confirm_with(showtime_id, seat_ids, hold_id, || Ok(()))
    }

    /// Confirm while running `commit` under the slot locks
    ///
    /// Slots flip to booked only if `commit` succeeds; on error nothing
    /// changes and the error is returned.
    #[instrument(skip(self, seat_ids, commit), fields(seats = seat_ids.len()))]
    pub fn confirm_with<T, F>(
        &self,
        showtime_id: ShowtimeId,
        seat_ids: &[SeatId],
        hold_id: HoldId,
        commit: F,
    ) -> AppResult<T>
    where
        F: FnOnce() -> AppResult<T>,
    {
        let arena = self.arena(showtime_id)?;
        let mut guards = self.lock_slots(&arena, seat_ids)?;

        if let Some((seat_id, slot)) = guards
            .iter()
            .find(|(_, slot)| **slot != Slot::Held(hold_id))
        {
            return Err(AppError::InconsistentState(format!(
                "hold {} does not own seat {} of showtime {} ({:?})",
                hold_id, seat_id, showtime_id, **slot
            )));
        }

        let value = commit()?;

        for (_, slot) in guards.iter_mut() {
            **slot = Slot::Booked(hold_id);
        }
        let count = guards.len();
        arena.held.fetch_sub(count, Ordering::AcqRel);
        arena.booked.fetch_add(count, Ordering::AcqRel);

        Ok(value)
    }

    /// Free the slots still held by `hold_id`
    ///
    /// Unknown showtimes, foreign slots and already released slots are left
    /// alone, so repeated calls are harmless. Returns the number of slots freed.
    #[instrument(skip(self, seat_ids), fields(seats = seat_ids.len()))]
    pub fn release(
        &self,
        showtime_id: ShowtimeId,
        seat_ids: &[SeatId],
        hold_id: HoldId,
    ) -> AppResult<usize> {
        let arena = match self.arena(showtime_id) {
            Ok(arena) => arena,
            Err(_) => return Ok(0),
        };
        let known: Vec<SeatId> = seat_ids
            .iter()
            .copied()
            .filter(|seat_id| arena.index.contains_key(seat_id))
            .collect();
        let mut guards = self.lock_slots(&arena, &known)?;

        let mut freed = 0;
        for (_, slot) in guards.iter_mut() {
            if **slot == Slot::Held(hold_id) {
                **slot = Slot::Free;
                freed += 1;
            }
        }
        arena.held.fetch_sub(freed, Ordering::AcqRel);

        Ok(freed)
    }

    /// total - booked - held; for display only
    pub fn available_count(&self, showtime_id: ShowtimeId) -> AppResult<usize> {
        let arena = self.arena(showtime_id)?;
        let taken = arena.held.load(Ordering::Acquire) + arena.booked.load(Ordering::Acquire);
        Ok(arena.total().saturating_sub(taken))
    }

    /// Per-seat view for seat maps
    pub fn seat_states(&self, showtime_id: ShowtimeId) -> AppResult<Vec<SeatAvailability>> {
        let arena = self.arena(showtime_id)?;
        Ok(arena
            .seat_ids
            .iter()
            .zip(arena.slots.iter())
            .map(|(seat_id, slot)| SeatAvailability {
                seat_id: *seat_id,
                state: match *slot.lock() {
                    Slot::Free => SeatState::Available,
                    Slot::Held(_) => SeatState::Held,
                    Slot::Booked(_) => SeatState::Booked,
                },
            })
            .collect())
    }
}
