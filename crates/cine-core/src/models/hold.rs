//! Seat hold model
//!
//! A hold is a time-bounded, exclusive claim on a set of seat slots. Its
//! status only moves through `SeatHold::transition_to`, which enforces the
//! hold lifecycle:
//!
//! ```text
//! Active -> Consumed | Expired | Released
//! ```

use super::booking::BookingId;
use super::showtime::{SeatId, ShowtimeId};
use crate::error::AppError;
use crate::AppResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type HoldId = Uuid;

/// Hold status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    /// Seats are claimed until `expires_at`
    #[default]
    Active,
    /// Converted into a confirmed booking
    Consumed,
    /// Deadline passed before confirmation
    Expired,
    /// Given up explicitly (cancel, payment failure)
    Released,
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoldStatus::Active => write!(f, "active"),
            HoldStatus::Consumed => write!(f, "consumed"),
            HoldStatus::Expired => write!(f, "expired"),
            HoldStatus::Released => write!(f, "released"),
        }
    }
}

impl HoldStatus {
    /// Only an active hold may move, and only to a terminal state
    pub fn can_transition_to(self, next: HoldStatus) -> bool {
        matches!(
            (self, next),
            (HoldStatus::Active, HoldStatus::Consumed)
                | (HoldStatus::Active, HoldStatus::Expired)
                | (HoldStatus::Active, HoldStatus::Released)
        )
    }

    /// Check if hold is finalized
    pub fn is_final(&self) -> bool {
        *self != HoldStatus::Active
    }
}

/// Seat hold entity
#[derive(Debug, Clone, Serialize)]
pub struct SeatHold {
    /// Unique identifier
    pub id: HoldId,

    /// Showtime whose slots are held
    pub showtime_id: ShowtimeId,

    /// Held seats, sorted ascending and free of duplicates
    pub seat_ids: Vec<SeatId>,

    /// Booking that owns the hold
    pub owner: BookingId,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Deadline; the hold is expired once `now > expires_at`
    pub expires_at: DateTime<Utc>,

    status: HoldStatus,

    /// When the hold left the active state
    pub finalized_at: Option<DateTime<Utc>>,
}

impl SeatHold {
    /// Create an active hold. `seat_ids` are normalized to ascending order.
    pub fn new(
        showtime_id: ShowtimeId,
        mut seat_ids: Vec<SeatId>,
        owner: BookingId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        seat_ids.sort_unstable();
        seat_ids.dedup();
        Self {
            id: Uuid::new_v4(),
            showtime_id,
            seat_ids,
            owner,
            created_at: now,
            expires_at: now + ttl,
            status: HoldStatus::Active,
            finalized_at: None,
        }
    }

    pub fn status(&self) -> HoldStatus {
        self.status
    }

    /// Expiry wins the tie: a hold is expired strictly after its deadline
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Active and within its deadline
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status == HoldStatus::Active && !self.is_expired_at(now)
    }

    /// Time left before the deadline, zero once expired
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        if self.is_expired_at(now) {
            Duration::zero()
        } else {
            self.expires_at - now
        }
    }

    /// Move to `next` if the hold lifecycle allows it
    pub fn transition_to(&mut self, next: HoldStatus, now: DateTime<Utc>) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InconsistentState(format!(
                "hold {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.finalized_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hold_at(now: DateTime<Utc>) -> SeatHold {
        SeatHold::new(1, vec![3, 1, 2, 2], Uuid::new_v4(), now, Duration::seconds(2))
    }

    #[test]
    fn test_new_hold_normalizes_seats() {
        let hold = hold_at(Utc::now());
        assert_eq!(hold.seat_ids, vec![1, 2, 3]);
        assert_eq!(hold.status(), HoldStatus::Active);
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let hold = hold_at(now);

        // Exactly at the deadline the hold is still live
        assert!(!hold.is_expired_at(now + Duration::seconds(2)));
        assert!(hold.is_expired_at(now + Duration::milliseconds(2001)));
        assert_eq!(
            hold.remaining_at(now + Duration::seconds(5)),
            Duration::zero()
        );
    }

    #[test]
    fn test_terminal_hold_cannot_move() {
        let now = Utc::now();
        let mut hold = hold_at(now);

        hold.transition_to(HoldStatus::Consumed, now).unwrap();
        assert!(hold.status().is_final());

        let err = hold.transition_to(HoldStatus::Released, now).unwrap_err();
        assert!(matches!(err, AppError::InconsistentState(_)));
        assert_eq!(hold.status(), HoldStatus::Consumed);
    }
}
