//! Cine Booking Database Layer
//!
//! PostgreSQL access for the reference data the booking engine consumes:
//!
//! - Connection pool management with sqlx
//! - Read-only catalog repository (showtimes, seats, surcharges, promotions,
//!   vouchers, memberships)
//! - Booking repository keeping settled bookings and their tickets
//! - Promotion and voucher redemption store
//! - Append-only loyalty points ledger

pub mod pool;
pub mod repositories;

pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use cine_core::{AppError, AppResult};
pub use sqlx::PgPool;
