//! Promotion and voucher redemption
//!
//! A voucher is claimed with a conditional update, so two bookings racing for
//! the same code cannot both succeed even across processes. Promotion uses are
//! keyed by (booking, promotion) and the running `current_usage` counter only
//! moves when a new usage row is actually inserted, which makes `redeem` safe
//! to repeat for the same booking.

use async_trait::async_trait;
use cine_core::{
    models::{BookingId, Redemption},
    traits::RedemptionStore,
    AppError, AppResult,
};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, info, instrument, warn};

/// PostgreSQL implementation of RedemptionStore
pub struct PgRedemptionStore {
    pool: PgPool,
}

impl PgRedemptionStore {
    /// Create a new redemption store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Database(format!("Failed to start transaction: {}", e))
        })
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> AppResult<()> {
        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Database(format!("Failed to commit redemption: {}", e))
        })
    }
}

#[async_trait]
impl RedemptionStore for PgRedemptionStore {
    #[instrument(skip(self, redemption), fields(booking_id = %redemption.booking_id))]
    async fn redeem(&self, redemption: &Redemption) -> AppResult<()> {
        let mut tx = self.begin().await?;

        if let Some(code) = &redemption.voucher_code {
            // Re-running for the booking that already owns the voucher is a no-op
            let claimed = sqlx::query(
                r#"
                UPDATE user_vouchers
                SET status = 'used', booking_id = $1, used_at = COALESCE(used_at, $2)
                WHERE voucher_code = $3
                  AND (status = 'available' OR (status = 'used' AND booking_id = $1))
                "#,
            )
            .bind(redemption.booking_id)
            .bind(redemption.redeemed_at)
            .bind(code)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error claiming voucher {}: {}", code, e);
                AppError::Database(format!("Failed to claim voucher: {}", e))
            })?;

            if claimed.rows_affected() == 0 {
                warn!(
                    "Voucher {} not available for booking {}",
                    code, redemption.booking_id
                );
                return Err(AppError::VoucherUnavailable(code.clone()));
            }
        }

        if let Some(promotion_id) = redemption.promotion_id {
            let inserted = sqlx::query(
                r#"
                INSERT INTO promotion_usages (promotion_id, user_id, booking_id, used_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (booking_id, promotion_id) DO NOTHING
                "#,
            )
            .bind(promotion_id)
            .bind(redemption.customer_id)
            .bind(redemption.booking_id)
            .bind(redemption.redeemed_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error recording promotion {} usage: {}", promotion_id, e);
                AppError::Database(format!("Failed to record promotion usage: {}", e))
            })?;

            if inserted.rows_affected() > 0 {
                sqlx::query(
                    r#"
                    UPDATE promotions
                    SET current_usage = current_usage + 1
                    WHERE promotion_id = $1
                    "#,
                )
                .bind(promotion_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!("Database error bumping promotion {} usage: {}", promotion_id, e);
                    AppError::Database(format!("Failed to update promotion usage: {}", e))
                })?;
            } else {
                debug!("Promotion {} usage already recorded", promotion_id);
            }
        }

        Self::commit(tx).await?;

        info!(
            "Recorded redemption for booking {} (promotion {:?}, voucher {:?})",
            redemption.booking_id, redemption.promotion_id, redemption.voucher_code
        );

        Ok(())
    }

    #[instrument(skip(self))]
    async fn revoke(&self, booking_id: BookingId) -> AppResult<()> {
        let mut tx = self.begin().await?;

        let released = sqlx::query(
            r#"
            UPDATE user_vouchers
            SET status = 'available', booking_id = NULL, used_at = NULL
            WHERE booking_id = $1 AND status = 'used'
            "#,
        )
        .bind(booking_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Database error releasing voucher of booking {}: {}", booking_id, e);
            AppError::Database(format!("Failed to release voucher: {}", e))
        })?;

        let removed: Vec<(i32,)> = sqlx::query_as(
            r#"
            DELETE FROM promotion_usages
            WHERE booking_id = $1
            RETURNING promotion_id
            "#,
        )
        .bind(booking_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            error!("Database error removing promotion usage of booking {}: {}", booking_id, e);
            AppError::Database(format!("Failed to remove promotion usage: {}", e))
        })?;

        for (promotion_id,) in &removed {
            sqlx::query(
                r#"
                UPDATE promotions
                SET current_usage = GREATEST(current_usage - 1, 0)
                WHERE promotion_id = $1
                "#,
            )
            .bind(promotion_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Database error restoring promotion {} usage: {}", promotion_id, e);
                AppError::Database(format!("Failed to update promotion usage: {}", e))
            })?;
        }

        Self::commit(tx).await?;

        info!(
            "Revoked redemption of booking {} ({} voucher(s), {} promotion use(s))",
            booking_id,
            released.rows_affected(),
            removed.len()
        );

        Ok(())
    }
}
