//! Cine Booking Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the seat reservation and checkout engine. It includes:
//!
//! - Domain models (Showtime, Seat, SeatHold, Booking, Ticket, Promotion, etc.)
//! - Collaborator traits (catalog, payment gateway, notifications, points ledger)
//! - Unified error handling with HTTP response mapping
//! - Application configuration
//! - Clock abstraction used for every deadline comparison

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
