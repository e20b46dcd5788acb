//! Booking handlers
//!
//! HTTP handlers driving a booking from seat hold to confirmation.

use crate::dto::booking::{
    BookingResponse, CheckInRequest, CreateBookingRequest, CreatedBookingResponse,
    CustomerBookingsQuery, ExtendHoldRequest, PaymentRequest, PaymentSubmissionResponse, PricingRequest,
    TicketResponse,
};
use crate::dto::ApiResponse;
use actix_web::{web, HttpResponse};
use chrono::Duration;
use cine_core::models::PaymentStatus;
use cine_core::AppError;
use cine_services::BookingEngine;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Hold seats and open a booking
///
/// POST /api/v1/bookings
#[instrument(skip(engine, req), fields(showtime_id = req.showtime_id, customer_id = req.customer_id))]
pub async fn create_booking(
    engine: web::Data<BookingEngine>,
    req: web::Json<CreateBookingRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Booking request validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let req = req.into_inner();
    debug!(seats = ?req.seat_ids, "Creating booking");

    let started = engine
        .start_booking(req.showtime_id, &req.seat_ids, req.customer_id)
        .await?;

    info!(
        booking_id = %started.booking_id,
        booking_code = %started.booking_code,
        "Booking created"
    );

    Ok(HttpResponse::Created().json(ApiResponse::with_message(
        CreatedBookingResponse::from(started),
        "Seats held",
    )))
}

/// Get a booking
///
/// GET /api/v1/bookings/{id}
#[instrument(skip(engine))]
pub async fn get_booking(
    engine: web::Data<BookingEngine>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let booking = engine.find_booking(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(BookingResponse::from(booking))))
}

/// Look a booking up by the code printed on the confirmation
///
/// GET /api/v1/bookings/code/{code}
#[instrument(skip(engine))]
pub async fn get_booking_by_code(
    engine: web::Data<BookingEngine>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let booking = engine.find_booking_by_code(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(BookingResponse::from(booking))))
}

/// List a customer's bookings, newest first
///
/// GET /api/v1/bookings?customer_id=42
#[instrument(skip(engine, query), fields(customer_id = query.customer_id))]
pub async fn list_customer_bookings(
    engine: web::Data<BookingEngine>,
    query: web::Query<CustomerBookingsQuery>,
) -> Result<HttpResponse, AppError> {
    query.validate().map_err(|e| {
        warn!("Booking list query validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let bookings = engine.customer_bookings(query.customer_id).await?;
    debug!(count = bookings.len(), "Listed customer bookings");

    let response: Vec<BookingResponse> = bookings.into_iter().map(BookingResponse::from).collect();
    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

/// Price the held seats and freeze the quote
///
/// POST /api/v1/bookings/{id}/pricing
#[instrument(skip(engine, req))]
pub async fn price_booking(
    engine: web::Data<BookingEngine>,
    path: web::Path<Uuid>,
    req: Option<web::Json<PricingRequest>>,
) -> Result<HttpResponse, AppError> {
    let req = req.map(web::Json::into_inner).unwrap_or_default();
    req.validate().map_err(|e| {
        warn!("Pricing request validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let breakdown = engine
        .apply_pricing(path.into_inner(), req.promotion_code, req.voucher_code)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(breakdown)))
}

/// Submit payment
///
/// POST /api/v1/bookings/{id}/payment
///
/// Answers 200 when the gateway settled synchronously and 202 while the
/// outcome is pending on the webhook.
#[instrument(skip(engine, req))]
pub async fn submit_payment(
    engine: web::Data<BookingEngine>,
    path: web::Path<Uuid>,
    req: web::Json<PaymentRequest>,
) -> Result<HttpResponse, AppError> {
    let req = req.into_inner();
    let submission = engine
        .submit_payment(path.into_inner(), req.method, req.quoted_total)
        .await?;

    let response = PaymentSubmissionResponse::from(submission);
    if response.payment_status == PaymentStatus::Pending {
        Ok(HttpResponse::Accepted().json(ApiResponse::with_message(
            response,
            "Payment pending",
        )))
    } else {
        Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
    }
}

/// Extend the seat hold
///
/// POST /api/v1/bookings/{id}/extend
#[instrument(skip(engine, req))]
pub async fn extend_hold(
    engine: web::Data<BookingEngine>,
    path: web::Path<Uuid>,
    req: web::Json<ExtendHoldRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Hold extension validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let booking = engine
        .extend_hold(path.into_inner(), Duration::seconds(req.extra_secs))
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(BookingResponse::from(booking))))
}

/// Cancel a booking; confirmed bookings are refunded
///
/// POST /api/v1/bookings/{id}/cancel
#[instrument(skip(engine))]
pub async fn cancel_booking(
    engine: web::Data<BookingEngine>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let booking = engine.cancel_booking(path.into_inner()).await?;

    info!(
        booking_id = %booking.id,
        status = %booking.status(),
        "Booking closed by customer"
    );

    Ok(HttpResponse::Ok().json(ApiResponse::success(BookingResponse::from(booking))))
}

/// Check a ticket in at the door
///
/// POST /api/v1/bookings/{id}/check-in
#[instrument(skip(engine, req))]
pub async fn check_in(
    engine: web::Data<BookingEngine>,
    path: web::Path<Uuid>,
    req: web::Json<CheckInRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Check-in validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let ticket = engine.check_in(path.into_inner(), &req.ticket_code).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(TicketResponse::from(&ticket))))
}

/// Configure booking routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/bookings")
            .route("", web::post().to(create_booking))
            .route("", web::get().to(list_customer_bookings))
            .route("/code/{code}", web::get().to(get_booking_by_code))
            .route("/{id}", web::get().to(get_booking))
            .route("/{id}/pricing", web::post().to(price_booking))
            .route("/{id}/payment", web::post().to(submit_payment))
            .route("/{id}/extend", web::post().to(extend_hold))
            .route("/{id}/cancel", web::post().to(cancel_booking))
            .route("/{id}/check-in", web::post().to(check_in)),
    );
}
