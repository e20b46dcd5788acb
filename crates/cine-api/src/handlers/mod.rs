//! HTTP request handlers

pub mod booking;
pub mod payment;
pub mod showtime;

pub use booking::configure as configure_bookings;
pub use payment::configure as configure_payments;
pub use showtime::configure as configure_showtimes;
