//! Ticket model
//!
//! Tickets are issued when a booking is confirmed. Each carries its own
//! slice of the frozen price breakdown.

use super::pricing::TicketPrice;
use super::showtime::{SeatId, SeatType};
use crate::error::AppError;
use crate::AppResult;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Ticket status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Booked,
    CheckedIn,
    Cancelled,
    Refunded,
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketStatus::Booked => write!(f, "booked"),
            TicketStatus::CheckedIn => write!(f, "checked_in"),
            TicketStatus::Cancelled => write!(f, "cancelled"),
            TicketStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl TicketStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "booked" => Some(TicketStatus::Booked),
            "checked_in" => Some(TicketStatus::CheckedIn),
            "cancelled" => Some(TicketStatus::Cancelled),
            "refunded" => Some(TicketStatus::Refunded),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (TicketStatus::Booked, TicketStatus::CheckedIn)
                | (TicketStatus::Booked, TicketStatus::Cancelled)
                | (TicketStatus::Booked, TicketStatus::Refunded)
        )
    }
}

/// Ticket entity
#[derive(Debug, Clone, Serialize)]
pub struct Ticket {
    pub id: Uuid,

    /// `TK` + 8 uppercase hex characters
    pub ticket_code: String,

    pub seat_id: SeatId,

    pub seat_type: SeatType,

    pub base_price: Decimal,

    pub surcharge: Decimal,

    /// Share of the booking discount
    pub discount: Decimal,

    pub final_price: Decimal,

    status: TicketStatus,

    pub checked_in_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Issue a ticket from its frozen price line
    pub fn issue(price: &TicketPrice) -> Self {
        let id = Uuid::new_v4();
        let ticket_code = format!(
            "TK{}",
            id.simple().to_string()[..8].to_uppercase()
        );
        Self {
            id,
            ticket_code,
            seat_id: price.seat_id,
            seat_type: price.seat_type,
            base_price: price.base_price,
            surcharge: price.surcharge,
            discount: price.discount,
            final_price: price.final_price,
            status: TicketStatus::Booked,
            checked_in_at: None,
        }
    }

    pub fn status(&self) -> TicketStatus {
        self.status
    }

    /// Set the status of a ticket loaded from storage
    pub fn restore_status(&mut self, status: TicketStatus) {
        self.status = status;
    }

    pub fn transition_to(&mut self, next: TicketStatus, now: DateTime<Utc>) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "ticket {} is {} and cannot become {}",
                self.ticket_code, self.status, next
            )));
        }
        if next == TicketStatus::CheckedIn {
            self.checked_in_at = Some(now);
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn price() -> TicketPrice {
        TicketPrice {
            seat_id: 5,
            seat_type: SeatType::Vip,
            base_price: dec!(90000),
            surcharge: dec!(30000),
            discount: dec!(5000),
            final_price: dec!(115000),
        }
    }

    #[test]
    fn test_issue_ticket() {
        let ticket = Ticket::issue(&price());
        assert!(ticket.ticket_code.starts_with("TK"));
        assert_eq!(ticket.ticket_code.len(), 10);
        assert_eq!(ticket.ticket_code, ticket.ticket_code.to_uppercase());
        assert_eq!(ticket.final_price, dec!(115000));
        assert_eq!(ticket.status(), TicketStatus::Booked);
    }

    #[test]
    fn test_check_in_once() {
        let now = Utc::now();
        let mut ticket = Ticket::issue(&price());

        ticket.transition_to(TicketStatus::CheckedIn, now).unwrap();
        assert_eq!(ticket.checked_in_at, Some(now));
        assert!(ticket.transition_to(TicketStatus::CheckedIn, now).is_err());
        assert!(ticket.transition_to(TicketStatus::Refunded, now).is_err());
    }
}
