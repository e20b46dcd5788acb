//! Booking services for the cinema booking engine
//!
//! This crate contains the components that sell seats: inventory, holds,
//! pricing and the checkout state machine that ties them together.
//!
//! # Architecture
//!
//! Services are designed to be composable and testable:
//! - Collaborators (catalog, gateway, notifier, points ledger, redemption
//!   store, booking repository) are injected as trait objects
//! - Time comes from an injected `Clock`
//! - Services are wrapped in Arc for safe sharing across async tasks
//! - All operations are instrumented with tracing
//!
//! # Services
//!
//! - `SeatInventory` - Per-showtime slot arena, all-or-nothing occupancy
//! - `HoldManager` - Seat holds with TTL, extension, confirm and release
//! - `PricingEngine` - Deterministic price breakdowns
//! - `BookingEngine` - Booking state machine from hold to payment
//! - `ExpirySweeper` - Background expiry of lapsed holds
//! - `HttpPaymentGateway` - reqwest client for the payment processor

pub mod booking_engine;
pub mod expiry_sweeper;
pub mod gateway;
pub mod hold_manager;
pub mod memory;
pub mod notify;
pub mod pricing;
pub mod redemption;
pub mod seat_inventory;

pub use booking_engine::{
    BookingEngine, Collaborators, EngineSettings, Eviction, PaymentSubmission, SeatMap,
    StartedBooking,
};
pub use expiry_sweeper::{ExpirySweeper, SweepReport};
pub use gateway::HttpPaymentGateway;
pub use hold_manager::HoldManager;
pub use memory::{InMemoryBookingStore, InMemoryCatalog, InMemoryPointsLedger};
pub use notify::TracingNotifier;
pub use pricing::{PricingEngine, PricingInput, PromotionClaim};
pub use redemption::RedemptionLedger;
pub use seat_inventory::SeatInventory;

