//! Payment and refund models
//!
//! Gateway-agnostic shapes exchanged with the `PaymentGateway` trait.

use super::booking::BookingId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    BankTransfer,
    EWallet,
    Cash,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::CreditCard => write!(f, "credit_card"),
            PaymentMethod::DebitCard => write!(f, "debit_card"),
            PaymentMethod::BankTransfer => write!(f, "bank_transfer"),
            PaymentMethod::EWallet => write!(f, "e_wallet"),
            PaymentMethod::Cash => write!(f, "cash"),
        }
    }
}

/// Result reported by the gateway for a charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Funds captured
    Succeeded {
        gateway_transaction_id: String,
        amount: Decimal,
    },
    /// Issuer refused the charge; the customer may try again
    Declined { reason: String },
    /// Gateway-side failure
    Failed { reason: String, retryable: bool },
}

impl PaymentOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentOutcome::Succeeded { .. } => "succeeded",
            PaymentOutcome::Declined { .. } => "declined",
            PaymentOutcome::Failed { .. } => "failed",
        }
    }
}

/// Immediate answer to a charge request
#[derive(Debug, Clone, PartialEq)]
pub enum ChargeAck {
    /// Outcome will arrive through the payment callback
    Pending,
    /// Gateway answered synchronously
    Completed(PaymentOutcome),
}

/// Charge request sent to the gateway
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChargeRequest {
    pub booking_id: BookingId,
    /// Idempotency key and callback correlation id
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
}

/// State of one payment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Declined,
    /// Transient gateway failure, may be retried
    Failed,
    /// Non-retryable gateway failure
    Rejected,
    /// Captured after the booking was closed and handed back
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Succeeded => write!(f, "succeeded"),
            PaymentStatus::Declined => write!(f, "declined"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Rejected => write!(f, "rejected"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

/// Payment attempt recorded on a booking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub reference: String,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub gateway_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PaymentAttempt {
    pub fn pending(
        reference: String,
        method: PaymentMethod,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            reference,
            method,
            amount,
            status: PaymentStatus::Pending,
            gateway_transaction_id: None,
            failure_reason: None,
            submitted_at: now,
            resolved_at: None,
        }
    }

    /// An outcome has already been applied
    pub fn is_resolved(&self) -> bool {
        self.status != PaymentStatus::Pending
    }
}

/// Why money is handed back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    /// Customer cancelled a confirmed booking
    CustomerRequest,
    /// Payment captured after the booking expired or was cancelled
    LateCapture,
    /// Voucher was redeemed by a concurrent booking first
    RedemptionConflict,
    /// Captured amount differs from the frozen total
    TechnicalError,
}

impl fmt::Display for RefundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefundReason::CustomerRequest => write!(f, "customer_request"),
            RefundReason::LateCapture => write!(f, "late_capture"),
            RefundReason::RedemptionConflict => write!(f, "redemption_conflict"),
            RefundReason::TechnicalError => write!(f, "technical_error"),
        }
    }
}

/// Refund request sent to the gateway
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RefundRequest {
    pub booking_id: BookingId,
    pub payment_reference: String,
    pub gateway_transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub reason: RefundReason,
}

/// Gateway acknowledgement of a refund
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundAck {
    pub refund_reference: String,
}
