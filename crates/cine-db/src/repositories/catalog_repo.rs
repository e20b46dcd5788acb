//! Catalog repository implementation
//!
//! Read-only PostgreSQL access to the reference data the booking engine
//! prices and validates against. Occupancy never lives here; the seat
//! inventory owns it.

use cine_core::{
    models::{
        ApplicableTo, CustomerId, HallId, Membership, MembershipTier, Promotion, PromotionType,
        Seat, SeatType, Showtime, ShowtimeId, ShowtimeStatus, SurchargeTable, Voucher,
        VoucherStatus,
    },
    traits::CatalogRepository,
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error, instrument, warn};

/// PostgreSQL implementation of CatalogRepository
pub struct PgCatalogRepository {
    pool: PgPool,
}

impl PgCatalogRepository {
    /// Create a new catalog repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_seat_type(s: &str) -> SeatType {
        SeatType::from_str(s).unwrap_or_else(|| {
            warn!("Unknown seat type '{}', treating as standard", s);
            SeatType::Standard
        })
    }
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    #[instrument(skip(self))]
    async fn find_showtime(&self, id: ShowtimeId) -> AppResult<Option<Showtime>> {
        debug!("Finding showtime by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, ShowtimeRow>(
            r#"
            SELECT showtime_id, movie_id, hall_id, starts_at, base_price, status
            FROM showtimes
            WHERE showtime_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding showtime {}: {}", id, e);
            AppError::Database(format!("Failed to find showtime: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_seats_by_hall(&self, hall_id: HallId) -> AppResult<Vec<Seat>> {
        debug!("Finding seats of hall {}", hall_id);

        let rows = sqlx::query_as::<sqlx::Postgres, SeatRow>(
            r#"
            SELECT seat_id, hall_id, seat_row, seat_number, seat_type
            FROM seats
            WHERE hall_id = $1 AND is_active = TRUE
            ORDER BY seat_id
            "#,
        )
        .bind(hall_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding seats of hall {}: {}", hall_id, e);
            AppError::Database(format!("Failed to fetch seats: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn seat_surcharges(&self) -> AppResult<SurchargeTable> {
        // Highest priority active rule per seat type wins
        let rows: Vec<(String, Decimal)> = sqlx::query_as(
            r#"
            SELECT DISTINCT ON (applies_to) applies_to, amount
            FROM pricing_rules
            WHERE rule_type = 'seat_type'
              AND is_active = TRUE
              AND (valid_from IS NULL OR valid_from <= NOW())
              AND (valid_to IS NULL OR valid_to >= NOW())
            ORDER BY applies_to, priority DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error loading seat surcharges: {}", e);
            AppError::Database(format!("Failed to load surcharges: {}", e))
        })?;

        let mut table = SurchargeTable::new();
        for (applies_to, amount) in rows {
            match SeatType::from_str(&applies_to) {
                Some(seat_type) => {
                    table.insert(seat_type, amount);
                }
                None => warn!("Ignoring surcharge rule for unknown seat type '{}'", applies_to),
            }
        }
        debug!("Loaded {} seat surcharges", table.len());

        Ok(table)
    }

    #[instrument(skip(self))]
    async fn find_promotion_by_code(&self, code: &str) -> AppResult<Option<Promotion>> {
        debug!("Finding promotion by code: {}", code);

        let result = sqlx::query_as::<sqlx::Postgres, PromotionRow>(&format!(
            "{} WHERE UPPER(promotion_code) = UPPER($1)",
            PROMOTION_SELECT
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding promotion {}: {}", code, e);
            AppError::Database(format!("Failed to find promotion: {}", e))
        })?;

        result.map(Promotion::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_promotion(&self, id: i32) -> AppResult<Option<Promotion>> {
        debug!("Finding promotion by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, PromotionRow>(&format!(
            "{} WHERE promotion_id = $1",
            PROMOTION_SELECT
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding promotion {}: {}", id, e);
            AppError::Database(format!("Failed to find promotion: {}", e))
        })?;

        result.map(Promotion::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_voucher_by_code(&self, code: &str) -> AppResult<Option<Voucher>> {
        debug!("Finding voucher by code: {}", code);

        let result = sqlx::query_as::<sqlx::Postgres, VoucherRow>(
            r#"
            SELECT voucher_id, voucher_code, promotion_id, user_id, status, expires_at
            FROM user_vouchers
            WHERE voucher_code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding voucher {}: {}", code, e);
            AppError::Database(format!("Failed to find voucher: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_membership(&self, customer_id: CustomerId) -> AppResult<Option<Membership>> {
        debug!("Finding membership of customer {}", customer_id);

        let result = sqlx::query_as::<sqlx::Postgres, MembershipRow>(
            r#"
            SELECT
                m.user_id, m.available_points,
                t.tier_id, t.tier_name, t.tier_level,
                t.discount_percentage, t.points_earn_rate
            FROM memberships m
            JOIN membership_tiers t ON t.tier_id = m.tier_id
            WHERE m.user_id = $1
              AND m.status = 'active'
              AND t.is_active = TRUE
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Database error finding membership of customer {}: {}",
                customer_id, e
            );
            AppError::Database(format!("Failed to find membership: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn count_customer_promotion_usage(
        &self,
        promotion_id: i32,
        customer_id: CustomerId,
    ) -> AppResult<i32> {
        let result: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM promotion_usages
            WHERE promotion_id = $1 AND user_id = $2
            "#,
        )
        .bind(promotion_id)
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error counting promotion usage: {}", e);
            AppError::Database(format!("Failed to count promotion usage: {}", e))
        })?;

        Ok(i32::try_from(result.0).unwrap_or(i32::MAX))
    }
}

const PROMOTION_SELECT: &str = r#"
    SELECT
        promotion_id, promotion_code, promotion_name, promotion_type,
        discount_percentage, discount_amount, min_purchase_amount,
        max_discount_amount, start_date, end_date,
        max_usage_total, max_usage_per_user, current_usage,
        is_active, stackable, applicable_to::text AS applicable_to
    FROM promotions
"#;

#[derive(Debug, sqlx::FromRow)]
struct ShowtimeRow {
    showtime_id: i32,
    movie_id: i32,
    hall_id: i32,
    starts_at: DateTime<Utc>,
    base_price: Decimal,
    status: String,
}

impl From<ShowtimeRow> for Showtime {
    fn from(row: ShowtimeRow) -> Self {
        Self {
            id: row.showtime_id,
            movie_id: row.movie_id,
            hall_id: row.hall_id,
            starts_at: row.starts_at,
            base_price: row.base_price,
            // Unknown statuses must not put a showtime on sale
            status: ShowtimeStatus::from_str(&row.status).unwrap_or(ShowtimeStatus::Cancelled),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SeatRow {
    seat_id: i32,
    hall_id: i32,
    seat_row: String,
    seat_number: i32,
    seat_type: String,
}

impl From<SeatRow> for Seat {
    fn from(row: SeatRow) -> Self {
        Self {
            id: row.seat_id,
            hall_id: row.hall_id,
            row: row.seat_row,
            number: row.seat_number,
            seat_type: PgCatalogRepository::parse_seat_type(&row.seat_type),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PromotionRow {
    promotion_id: i32,
    promotion_code: String,
    promotion_name: String,
    promotion_type: String,
    discount_percentage: Option<Decimal>,
    discount_amount: Option<Decimal>,
    min_purchase_amount: Option<Decimal>,
    max_discount_amount: Option<Decimal>,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    max_usage_total: Option<i32>,
    max_usage_per_user: Option<i32>,
    current_usage: i32,
    is_active: bool,
    stackable: bool,
    applicable_to: Option<String>,
}

impl TryFrom<PromotionRow> for Promotion {
    type Error = AppError;

    fn try_from(row: PromotionRow) -> Result<Self, Self::Error> {
        let promotion_type = PromotionType::from_str(&row.promotion_type).ok_or_else(|| {
            error!(
                "Promotion {} has unknown type '{}'",
                row.promotion_code, row.promotion_type
            );
            AppError::Database(format!(
                "Unknown promotion type '{}' for {}",
                row.promotion_type, row.promotion_code
            ))
        })?;

        let applicable_to = match row.applicable_to.as_deref() {
            None | Some("") | Some("null") => ApplicableTo::default(),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                error!(
                    "Promotion {} has malformed applicable_to: {}",
                    row.promotion_code, e
                );
                AppError::Database(format!(
                    "Malformed applicable_to for {}: {}",
                    row.promotion_code, e
                ))
            })?,
        };

        Ok(Self {
            id: row.promotion_id,
            code: row.promotion_code,
            name: row.promotion_name,
            promotion_type,
            discount_percentage: row.discount_percentage,
            discount_amount: row.discount_amount,
            min_purchase_amount: row.min_purchase_amount,
            max_discount_amount: row.max_discount_amount,
            start_date: row.start_date,
            end_date: row.end_date,
            max_usage_total: row.max_usage_total,
            max_usage_per_user: row.max_usage_per_user,
            current_usage: row.current_usage,
            is_active: row.is_active,
            stackable: row.stackable,
            applicable_to,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VoucherRow {
    voucher_id: i32,
    voucher_code: String,
    promotion_id: i32,
    user_id: Option<i32>,
    status: String,
    expires_at: Option<DateTime<Utc>>,
}

impl From<VoucherRow> for Voucher {
    fn from(row: VoucherRow) -> Self {
        Self {
            id: row.voucher_id,
            code: row.voucher_code,
            promotion_id: row.promotion_id,
            customer_id: row.user_id,
            status: VoucherStatus::from_str(&row.status).unwrap_or(VoucherStatus::Cancelled),
            expires_at: row.expires_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MembershipRow {
    user_id: i32,
    available_points: i64,
    tier_id: i32,
    tier_name: String,
    tier_level: i32,
    discount_percentage: Decimal,
    points_earn_rate: Decimal,
}

impl From<MembershipRow> for Membership {
    fn from(row: MembershipRow) -> Self {
        Self {
            customer_id: row.user_id,
            tier: MembershipTier {
                id: row.tier_id,
                tier_name: row.tier_name,
                tier_level: row.tier_level,
                discount_percentage: row.discount_percentage,
                points_earn_rate: row.points_earn_rate,
            },
            available_points: row.available_points,
        }
    }
}
