//! Payment gateway webhook

use crate::dto::booking::{BookingResponse, PaymentCallbackRequest};
use crate::dto::ApiResponse;
use crate::webhook::{WebhookVerifier, SIGNATURE_HEADER};
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use cine_core::AppError;
use cine_services::BookingEngine;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Apply an asynchronous payment outcome
///
/// POST /api/v1/payments/callback
///
/// The raw body must carry a valid `X-Cine-Signature`; unsigned or forged
/// callbacks answer 401 before the body is parsed. Duplicate deliveries for an
/// already resolved attempt answer 200 with the unchanged booking so the
/// gateway stops retrying.
#[instrument(skip_all)]
pub async fn payment_callback(
    engine: web::Data<BookingEngine>,
    verifier: web::Data<WebhookVerifier>,
    http: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let signature = http
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("Payment callback without signature");
            AppError::Unauthorized("missing signature".to_string())
        })?;
    verifier.verify(&body, signature, Utc::now())?;

    let req: PaymentCallbackRequest = serde_json::from_slice(&body).map_err(|e| {
        warn!("Payment callback body rejected: {}", e);
        AppError::Validation(format!("invalid callback body: {}", e))
    })?;
    req.validate().map_err(|e| {
        warn!("Payment callback validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let PaymentCallbackRequest { reference, outcome } = req;
    let outcome_label = outcome.label();
    let booking = engine.on_payment_result(&reference, outcome).await?;

    info!(
        reference = %reference,
        outcome = outcome_label,
        booking_id = %booking.id,
        status = %booking.status(),
        "Payment callback applied"
    );

    Ok(HttpResponse::Ok().json(ApiResponse::success(BookingResponse::from(booking))))
}

/// Configure payment routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/payments").route("/callback", web::post().to(payment_callback)));
}
