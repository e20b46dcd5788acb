//! Cine Booking HTTP server
//!
//! Seat hold, pricing and checkout API backed by PostgreSQL reference data
//! and an external payment gateway.

use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use cine_api::{configure_bookings, configure_payments, configure_showtimes, WebhookVerifier};
use cine_core::{AppConfig, Clock, SystemClock};
use cine_db::{
    create_pool, run_migrations, PgBookingRepository, PgCatalogRepository, PgPointsLedger,
    PgRedemptionStore,
};
use cine_services::{
    BookingEngine, Collaborators, EngineSettings, ExpirySweeper, HoldManager,
    HttpPaymentGateway, PricingEngine, SeatInventory, TracingNotifier,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Health check endpoint
async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "cine-booking",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Configure API routes
fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health_check))
            .configure(configure_bookings)
            .configure(configure_payments)
            .configure(configure_showtimes),
    );
}

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "cine_booking={lvl},cine_api={lvl},cine_services={lvl},cine_db={lvl},cine={lvl},actix_web=info,sqlx=warn",
            lvl = log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Cine Booking v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("Failed to load configuration")?;

    info!("Connecting to database...");
    let pool = create_pool(&config.database)
        .await
        .context("Failed to create database pool")?;

    if env::var("RUN_MIGRATIONS").map(|v| v == "true").unwrap_or(false) {
        run_migrations(&pool).await?;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let gateway = HttpPaymentGateway::new(
        &config.payment.gateway_url,
        Duration::from_secs(config.payment.timeout_secs),
    )?;
    info!("Payment gateway client configured for {}", config.payment.gateway_url);

    let booking = &config.booking;
    let inventory = Arc::new(SeatInventory::new(Duration::from_millis(
        booking.lock_timeout_ms,
    )));
    let holds = Arc::new(HoldManager::new(
        inventory,
        clock.clone(),
        chrono::Duration::seconds(booking.max_hold_duration_secs),
    ));
    let pricing = PricingEngine::new(
        config.pricing.clone(),
        booking.currency.clone(),
        booking.currency_minor_units,
    );

    let engine = Arc::new(BookingEngine::new(
        Collaborators {
            catalog: Arc::new(PgCatalogRepository::new(pool.clone())),
            redemptions: Arc::new(PgRedemptionStore::new(pool.clone())),
            bookings: Arc::new(PgBookingRepository::new(pool.clone())),
            gateway: Arc::new(gateway),
            notifier: Arc::new(TracingNotifier::new()),
            points: Arc::new(PgPointsLedger::new(pool.clone())),
        },
        holds,
        pricing,
        clock.clone(),
        EngineSettings::from(booking),
    ));

    // Background expiry of lapsed holds
    let shutdown = CancellationToken::new();
    let sweeper = ExpirySweeper::new(
        engine.clone(),
        clock.clone(),
        Duration::from_secs(booking.sweep_interval_secs),
        chrono::Duration::seconds(booking.hold_retention_secs),
    )
    .spawn(shutdown.clone());

    info!(
        "Expiry sweeper running every {}s, hold TTL {}s",
        booking.sweep_interval_secs, booking.hold_ttl_secs
    );

    let bind_addr = config.server_addr();
    let workers = config.server.workers;
    let cors_origins = config.server.cors_origins.clone();
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, workers
    );

    let engine_data = web::Data::from(engine);
    let verifier_data = web::Data::new(WebhookVerifier::from_config(&config.payment));

    HttpServer::new(move || {
        let cors_origins_inner = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _req_head| {
                let origins: Vec<&str> = cors_origins_inner.split(',').collect();
                if let Ok(origin_str) = origin.to_str() {
                    origins.iter().any(|o| o.trim() == origin_str)
                } else {
                    false
                }
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .app_data(engine_data.clone())
            .app_data(verifier_data.clone())
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                let error_message = err.to_string();
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(serde_json::json!({
                        "error": "invalid_json",
                        "message": error_message,
                        "status": 400
                    })),
                )
                .into()
            }))
            // Middleware
            .wrap(cors)
            .wrap(middleware::Logger::new("%a \"%r\" %s %b %Dms"))
            .wrap(TracingLogger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(configure_routes)
    })
    .workers(workers)
    .client_request_timeout(Duration::from_secs(config.server.timeout_secs))
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run()
    .await?;

    info!("HTTP server stopped, shutting down sweeper");
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!("Expiry sweeper ended abnormally: {}", e);
    }

    Ok(())
}
