//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Comma-separated origins allowed by CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_timeout() -> u64 {
    30
}

fn default_cors_origins() -> String {
    "http://localhost:3000,http://127.0.0.1:3000".to_string()
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

/// Hold and checkout timing
#[derive(Debug, Deserialize, Clone)]
pub struct BookingConfig {
    /// Default hold TTL in seconds
    #[serde(default = "default_hold_ttl")]
    pub hold_ttl_secs: i64,

    /// Upper bound on a hold's lifetime, extensions included
    #[serde(default = "default_max_hold_duration")]
    pub max_hold_duration_secs: i64,

    /// Bounded wait on a single seat slot lock
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// Expiry sweeper period
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How long terminal holds and abandoned bookings are kept before purge
    #[serde(default = "default_hold_retention")]
    pub hold_retention_secs: i64,

    /// Confirmed bookings cannot be refunded this close to the showtime
    #[serde(default = "default_refund_cutoff")]
    pub refund_cutoff_minutes: i64,

    /// Maximum seats in one booking
    #[serde(default = "default_max_seats")]
    pub max_seats_per_booking: usize,

    /// ISO currency code
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Decimal places of the currency's minor unit
    #[serde(default)]
    pub currency_minor_units: u32,

    /// Money spent per loyalty point
    #[serde(default = "default_points_conversion_rate")]
    pub points_conversion_rate: Decimal,

    /// Settled bookings and the showtime's seat arena leave memory this long after the show starts
    #[serde(default = "default_evict_after_show")]
    pub evict_after_show_minutes: i64,
}

fn default_hold_ttl() -> i64 {
    300 // 5 minutes
}

fn default_max_hold_duration() -> i64 {
    900 // 15 minutes
}

fn default_lock_timeout() -> u64 {
    250
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_hold_retention() -> i64 {
    3600
}

fn default_refund_cutoff() -> i64 {
    120
}

fn default_max_seats() -> usize {
    10
}

fn default_currency() -> String {
    "VND".to_string()
}

fn default_points_conversion_rate() -> Decimal {
    Decimal::from(1000)
}

fn default_evict_after_show() -> i64 {
    240
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            hold_ttl_secs: default_hold_ttl(),
            max_hold_duration_secs: default_max_hold_duration(),
            lock_timeout_ms: default_lock_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            hold_retention_secs: default_hold_retention(),
            refund_cutoff_minutes: default_refund_cutoff(),
            max_seats_per_booking: default_max_seats(),
            currency: default_currency(),
            currency_minor_units: 0,
            points_conversion_rate: default_points_conversion_rate(),
            evict_after_show_minutes: default_evict_after_show(),
        }
    }
}

impl BookingConfig {
    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hold_ttl_secs <= 0 {
            return Err(ConfigError::Message(
                "booking.hold_ttl_secs must be positive".to_string(),
            ));
        }
        if self.hold_ttl_secs > self.max_hold_duration_secs {
            return Err(ConfigError::Message(format!(
                "booking.hold_ttl_secs ({}) exceeds booking.max_hold_duration_secs ({})",
                self.hold_ttl_secs, self.max_hold_duration_secs
            )));
        }
        if self.max_seats_per_booking == 0 {
            return Err(ConfigError::Message(
                "booking.max_seats_per_booking must be at least 1".to_string(),
            ));
        }
        if self.points_conversion_rate <= Decimal::ZERO {
            return Err(ConfigError::Message(
                "booking.points_conversion_rate must be positive".to_string(),
            ));
        }
        if self.evict_after_show_minutes < 0 {
            return Err(ConfigError::Message(
                "booking.evict_after_show_minutes must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// How the service fee is charged
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ServiceFeeConfig {
    /// One fee per booking
    Flat { amount: Decimal },
    /// Fee multiplied by ticket count
    PerTicket { amount: Decimal },
    /// Highest tier whose threshold the subtotal reaches
    Tiered { tiers: Vec<ServiceFeeTier> },
}

/// Subtotal threshold and the fee charged from it upward
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServiceFeeTier {
    pub min_subtotal: Decimal,
    pub amount: Decimal,
}

impl Default for ServiceFeeConfig {
    fn default() -> Self {
        ServiceFeeConfig::Flat {
            amount: Decimal::from(5000),
        }
    }
}

/// What to do when a requested promotion fails validation
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromotionFailurePolicy {
    /// Fail the pricing call with `InvalidPromotion`
    #[default]
    Reject,
    /// Price without the promotion and report the reason in the breakdown
    ContinueWithoutDiscount,
}

/// Pricing parameters
#[derive(Debug, Deserialize, Clone)]
pub struct PricingConfig {
    /// Tax applied to the discounted subtotal, in percent
    #[serde(default = "default_tax_percent")]
    pub tax_percent: Decimal,

    #[serde(default)]
    pub service_fee: ServiceFeeConfig,

    #[serde(default)]
    pub promotion_policy: PromotionFailurePolicy,
}

fn default_tax_percent() -> Decimal {
    Decimal::from(10)
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tax_percent: default_tax_percent(),
            service_fee: ServiceFeeConfig::default(),
            promotion_policy: PromotionFailurePolicy::default(),
        }
    }
}

/// Payment gateway client settings
#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    /// Gateway base URL
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,

    /// Shared secret the gateway signs callbacks with
    #[serde(default)]
    pub webhook_secret: String,

    /// Maximum age of a signed callback in seconds
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: i64,
}

fn default_gateway_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_gateway_timeout() -> u64 {
    10
}

fn default_webhook_tolerance() -> i64 {
    300
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            timeout_secs: default_gateway_timeout(),
            webhook_secret: String::new(),
            webhook_tolerance_secs: default_webhook_tolerance(),
        }
    }
}

impl PaymentConfig {
    /// Callbacks cannot be authenticated without a secret
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_secret.trim().is_empty() {
            return Err(ConfigError::Message(
                "payment.webhook_secret must be set".to_string(),
            ));
        }
        if self.webhook_tolerance_secs <= 0 {
            return Err(ConfigError::Message(
                "payment.webhook_tolerance_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("server.timeout_secs", 30)?
            .set_default("server.cors_origins", default_cors_origins())?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("booking.hold_ttl_secs", 300)?
            .set_default("booking.max_hold_duration_secs", 900)?
            .set_default("booking.lock_timeout_ms", 250)?
            .set_default("booking.sweep_interval_secs", 5)?
            .set_default("booking.refund_cutoff_minutes", 120)?
            .set_default("booking.currency", "VND")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with CINE_ prefix
            .add_source(
                Environment::with_prefix("CINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CINE").separator("__"))
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// Cross-field checks the deserializer cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.booking.validate()?;
        self.payment.validate()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
