//! API layer for the cinema booking engine
//!
//! HTTP handlers for holding seats, pricing, payment and the gateway webhook.
//! Handlers share one `BookingEngine` through `web::Data`; the callback also
//! needs a `WebhookVerifier`.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod dto;
pub mod handlers;
pub mod webhook;

pub use dto::ApiResponse;
pub use handlers::{configure_bookings, configure_payments, configure_showtimes};
pub use webhook::{WebhookVerifier, SIGNATURE_HEADER};
