//! Repository implementations
//!
//! Concrete implementations of the collaborator traits defined in cine-core,
//! using sqlx for PostgreSQL access.

pub mod booking_repo;
pub mod catalog_repo;
pub mod points_repo;
pub mod redemption_repo;

pub use booking_repo::PgBookingRepository;
pub use catalog_repo::PgCatalogRepository;
pub use points_repo::PgPointsLedger;
pub use redemption_repo::PgRedemptionStore;
