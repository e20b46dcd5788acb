//! Payment callback signatures
//!
//! The gateway signs every callback with HMAC-SHA256 over `"{timestamp}.{body}"`
//! using the shared webhook secret, and sends `t=<unix seconds>,v1=<hex digest>`
//! in the `X-Cine-Signature` header.

use chrono::{DateTime, Utc};
use cine_core::config::PaymentConfig;
use cine_core::AppError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

/// Header carrying the callback signature
pub const SIGNATURE_HEADER: &str = "x-cine-signature";

type HmacSha256 = Hmac<Sha256>;

/// Verifies signed payment callbacks
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    pub fn from_config(config: &PaymentConfig) -> Self {
        Self::new(config.webhook_secret.clone(), config.webhook_tolerance_secs)
    }

    fn mac(&self, timestamp: &str, payload: &[u8]) -> Result<HmacSha256, AppError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| AppError::Internal(format!("HMAC key error: {}", e)))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Header value for `payload` signed at `timestamp`
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, AppError> {
        let timestamp = timestamp.to_string();
        let digest = self.mac(&timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
    }

    /// Check the signature header against the raw body
    ///
    /// Rejects malformed headers, digest mismatches and timestamps further
    /// than the tolerance from `now` in either direction.
    pub fn verify(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let mut timestamp = "";
        let mut signature = "";
        for part in header.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = t;
            } else if let Some(v) = part.strip_prefix("v1=") {
                signature = v;
            }
        }

        if timestamp.is_empty() || signature.is_empty() {
            warn!("Malformed callback signature header");
            return Err(AppError::Unauthorized(
                "malformed signature header".to_string(),
            ));
        }

        let sig_bytes = hex::decode(signature).map_err(|_| {
            warn!("Callback signature is not valid hex");
            AppError::Unauthorized("invalid signature encoding".to_string())
        })?;
        self.mac(timestamp, payload)?
            .verify_slice(&sig_bytes)
            .map_err(|_| {
                warn!("Callback signature mismatch");
                AppError::Unauthorized("signature mismatch".to_string())
            })?;

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| AppError::Unauthorized("invalid signature timestamp".to_string()))?;
        if (now.timestamp() - ts).abs() > self.tolerance_secs {
            warn!(signed_at = ts, "Callback signature outside tolerance");
            return Err(AppError::Unauthorized(
                "signature timestamp outside tolerance".to_string(),
            ));
        }

        Ok(())
    }
}
