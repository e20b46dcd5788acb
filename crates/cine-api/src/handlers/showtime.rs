//! Showtime handlers

use crate::dto::booking::SeatMapResponse;
use crate::dto::ApiResponse;
use actix_web::{web, HttpResponse};
use cine_core::models::ShowtimeId;
use cine_core::AppError;
use cine_services::BookingEngine;
use tracing::instrument;

/// Seat map with live occupancy
///
/// GET /api/v1/showtimes/{id}/seats
#[instrument(skip(engine))]
pub async fn get_seat_map(
    engine: web::Data<BookingEngine>,
    path: web::Path<ShowtimeId>,
) -> Result<HttpResponse, AppError> {
    let map = engine.seat_map(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(SeatMapResponse::from(map))))
}

/// Configure showtime routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/showtimes").route("/{id}/seats", web::get().to(get_seat_map)));
}
