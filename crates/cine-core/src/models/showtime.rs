//! Showtime and seat models
//!
//! Reference data read from the catalog. Occupancy of a seat is tracked per
//! (showtime, seat) slot by the seat inventory, never on these records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub type ShowtimeId = i32;
pub type SeatId = i32;
pub type HallId = i32;
pub type CustomerId = i32;

/// Showtime status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShowtimeStatus {
    /// Open for sale
    #[default]
    Scheduled,
    /// Cancelled by the venue
    Cancelled,
    /// Already played
    Completed,
}

impl fmt::Display for ShowtimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShowtimeStatus::Scheduled => write!(f, "scheduled"),
            ShowtimeStatus::Cancelled => write!(f, "cancelled"),
            ShowtimeStatus::Completed => write!(f, "completed"),
        }
    }
}

impl ShowtimeStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "scheduled" => Some(ShowtimeStatus::Scheduled),
            "cancelled" => Some(ShowtimeStatus::Cancelled),
            "completed" => Some(ShowtimeStatus::Completed),
            _ => None,
        }
    }
}

/// Showtime entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Showtime {
    /// Unique identifier
    pub id: ShowtimeId,

    /// Movie being shown
    pub movie_id: i32,

    /// Hall whose seats make up the inventory
    pub hall_id: HallId,

    /// Start of the screening
    pub starts_at: DateTime<Utc>,

    /// Base ticket price before seat-type surcharge
    pub base_price: Decimal,

    /// Current status
    pub status: ShowtimeStatus,
}

impl Showtime {
    /// Whether tickets can still be sold
    pub fn is_on_sale(&self, now: DateTime<Utc>) -> bool {
        self.status == ShowtimeStatus::Scheduled && now < self.starts_at
    }
}

/// Seat type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeatType {
    #[default]
    Standard,
    Vip,
    Couple,
    Wheelchair,
}

impl fmt::Display for SeatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeatType::Standard => write!(f, "standard"),
            SeatType::Vip => write!(f, "vip"),
            SeatType::Couple => write!(f, "couple"),
            SeatType::Wheelchair => write!(f, "wheelchair"),
        }
    }
}

impl SeatType {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "standard" => Some(SeatType::Standard),
            "vip" => Some(SeatType::Vip),
            "couple" => Some(SeatType::Couple),
            "wheelchair" => Some(SeatType::Wheelchair),
            _ => None,
        }
    }
}

/// Surcharge per seat type; missing entries mean no surcharge
pub type SurchargeTable = HashMap<SeatType, Decimal>;

/// Physical seat in a hall
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Seat {
    pub id: SeatId,
    pub hall_id: HallId,
    /// Row label, e.g. "A"
    pub row: String,
    /// Position within the row
    pub number: i32,
    pub seat_type: SeatType,
}

impl Seat {
    /// Human label such as "A7"
    pub fn label(&self) -> String {
        format!("{}{}", self.row, self.number)
    }
}

/// Occupancy of one slot as shown on a seat map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatState {
    Available,
    Held,
    Booked,
}

/// One entry of the seat map view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatAvailability {
    pub seat_id: SeatId,
    pub state: SeatState,
}
