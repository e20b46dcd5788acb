//! Unified error handling for the booking engine
//!
//! This module provides a comprehensive error type that covers all possible
//! failure scenarios in the application, with automatic HTTP response mapping.

use crate::models::{BookingStatus, PromotionRejection, SeatId};
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    // ==================== Seat & Hold Errors ====================
    #[error("Seats unavailable: {seat_ids:?}")]
    SeatUnavailable { seat_ids: Vec<SeatId> },

    #[error("Hold expired: {0}")]
    HoldExpired(String),

    #[error("Hold not found: {0}")]
    HoldNotFound(String),

    #[error("Hold cannot be extended beyond {max_secs} seconds")]
    HoldExtensionLimit { max_secs: i64 },

    #[error("Seat not found: {0}")]
    SeatNotFound(String),

    #[error("Showtime not found: {0}")]
    ShowtimeNotFound(String),

    // ==================== Booking Errors ====================
    #[error("Booking not found: {0}")]
    BookingNotFound(String),

    #[error("Invalid booking transition: {from} -> {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },

    #[error("Quoted total {quoted} does not match frozen total {frozen}")]
    PriceMismatch { quoted: String, frozen: String },

    #[error("Refund window closed: {0}")]
    RefundWindowClosed(String),

    // ==================== Promotion Errors ====================
    #[error("Invalid promotion {code}: {reason}")]
    InvalidPromotion {
        code: String,
        reason: PromotionRejection,
    },

    #[error("Voucher unavailable: {0}")]
    VoucherUnavailable(String),

    // ==================== Payment Errors ====================
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    #[error("Payment gateway error: {0}")]
    PaymentGateway(String),

    // ==================== Integrity Errors ====================
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ==================== Auth Errors ====================
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,

            // 402 Payment Required
            AppError::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,

            // 404 Not Found
            AppError::HoldNotFound(_)
            | AppError::SeatNotFound(_)
            | AppError::ShowtimeNotFound(_)
            | AppError::BookingNotFound(_)
            | AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::SeatUnavailable { .. }
            | AppError::InvalidTransition { .. }
            | AppError::PriceMismatch { .. }
            | AppError::VoucherUnavailable(_)
            | AppError::RefundWindowClosed(_)
            | AppError::Conflict(_) => StatusCode::CONFLICT,

            // 410 Gone
            AppError::HoldExpired(_) => StatusCode::GONE,

            // 422 Unprocessable Entity
            AppError::InvalidPromotion { .. } | AppError::HoldExtensionLimit { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            // 502 Bad Gateway
            AppError::PaymentGateway(_) => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::SeatUnavailable { .. } => "seat_unavailable",
            AppError::HoldExpired(_) => "hold_expired",
            AppError::HoldNotFound(_) => "hold_not_found",
            AppError::HoldExtensionLimit { .. } => "hold_extension_limit",
            AppError::SeatNotFound(_) => "seat_not_found",
            AppError::ShowtimeNotFound(_) => "showtime_not_found",
            AppError::BookingNotFound(_) => "booking_not_found",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::PriceMismatch { .. } => "price_mismatch",
            AppError::RefundWindowClosed(_) => "refund_window_closed",
            AppError::InvalidPromotion { .. } => "invalid_promotion",
            AppError::VoucherUnavailable(_) => "voucher_unavailable",
            AppError::PaymentDeclined(_) => "payment_declined",
            AppError::PaymentGateway(_) => "payment_gateway_error",
            AppError::InconsistentState(_) => "inconsistent_state",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Conflict(_) | AppError::PaymentGateway(_) | AppError::Pool(_)
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let mut body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        match self {
            AppError::SeatUnavailable { seat_ids } => {
                body["unavailable_seats"] = json!(seat_ids);
            }
            AppError::InvalidPromotion { code, reason } => {
                body["promotion_code"] = json!(code);
                body["reason"] = json!(reason);
            }
            _ => {}
        }

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => AppError::Pool(err.to_string()),
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
