//! Loyalty points ledger
//!
//! Entries are only ever inserted. When the customer holds an active
//! membership its running balance is moved in the same transaction and the
//! before/after balances are recorded on the entry.

use cine_core::{
    models::{PointsTransaction, PointsTransactionType},
    traits::PointsLedger,
    AppError, AppResult,
};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error, info, instrument};

/// PostgreSQL implementation of PointsLedger
pub struct PgPointsLedger {
    pool: PgPool,
}

impl PgPointsLedger {
    /// Create a new points ledger
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Effect of an entry on the running balance
    fn signed_points(entry: &PointsTransaction) -> i64 {
        match entry.transaction_type {
            PointsTransactionType::Earn => entry.points,
            PointsTransactionType::Redeem | PointsTransactionType::Expire => -entry.points,
        }
    }
}

#[async_trait]
impl PointsLedger for PgPointsLedger {
    #[instrument(skip(self, entry), fields(customer_id = entry.customer_id, points = entry.points))]
    async fn append(&self, entry: &PointsTransaction) -> AppResult<()> {
        debug!("Appending points transaction {}", entry.id);

        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Database(format!("Failed to start transaction: {}", e))
        })?;

        let balance_after: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE memberships
            SET available_points = available_points + $1, updated_at = NOW()
            WHERE user_id = $2 AND status = 'active'
            RETURNING available_points
            "#,
        )
        .bind(Self::signed_points(entry))
        .bind(entry.customer_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            error!(
                "Database error moving points balance of customer {}: {}",
                entry.customer_id, e
            );
            AppError::Database(format!("Failed to update points balance: {}", e))
        })?;

        let balance_after = balance_after.map(|(balance,)| balance);
        let balance_before = balance_after.map(|balance| balance - Self::signed_points(entry));

        sqlx::query(
            r#"
            INSERT INTO points_transactions (
                transaction_id, user_id, transaction_type, points_amount,
                source_type, source_id, description,
                balance_before, balance_after, expires_at, created_at
            )
            VALUES ($1, $2, $3, $4, 'booking', $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.customer_id)
        .bind(entry.transaction_type.to_string())
        .bind(entry.points)
        .bind(entry.booking_id)
        .bind(&entry.description)
        .bind(balance_before)
        .bind(balance_after)
        .bind(entry.expires_at)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Database error inserting points transaction {}: {}", entry.id, e);
            AppError::Database(format!("Failed to record points transaction: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Database(format!("Failed to commit points transaction: {}", e))
        })?;

        info!(
            "Recorded {} {} points for customer {}",
            entry.transaction_type, entry.points, entry.customer_id
        );

        Ok(())
    }
}
