//! Usage snapshots
//!
//! Computes a user's current consumption for each gated resource: collection
//! sizes are derived from the inventory tables, the monthly AI-recipe count
//! from the persisted counter on the user row.
//!
//! The monthly counter is reset lazily on read rather than by a scheduled
//! job. The reset is a single conditional UPDATE keyed on the stale reset
//! instant, so concurrent readers that both observe an elapsed window cannot
//! each zero the counter and drop an increment that landed in between; the
//! race loser affects zero rows and simply re-reads current state.

use sqlx::PgPool;
use uuid::Uuid;

use crate::catalog::QuotaResource;
use crate::error::{BillingError, BillingResult};

/// Read-side provider of current usage per resource
#[derive(Clone)]
pub struct UsageSnapshots {
    pool: PgPool,
}

impl UsageSnapshots {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Current usage for a resource
    ///
    /// For the monthly AI-recipe quota the reset window is reconciled first,
    /// so a caller never sees a count from an elapsed cycle.
    pub async fn usage_for(&self, user_id: Uuid, resource: QuotaResource) -> BillingResult<u32> {
        match resource {
            QuotaResource::PantryItems => self.collection_count(user_id, "pantry_items").await,
            QuotaResource::CookwareItems => self.collection_count(user_id, "cookware_items").await,
            QuotaResource::AiRecipesPerMonth => self.ai_recipes_this_month(user_id).await,
        }
    }

    async fn collection_count(&self, user_id: Uuid, table: &str) -> BillingResult<u32> {
        // Table name comes from the two fixed arms above, never user input
        let query = format!("SELECT COUNT(*) FROM {} WHERE user_id = $1", table);
        let count: (i64,) = sqlx::query_as(&query)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0.max(0) as u32)
    }

    /// Monthly AI-recipe count, after lazy window reconciliation
    pub async fn ai_recipes_this_month(&self, user_id: Uuid) -> BillingResult<u32> {
        self.reconcile_monthly_reset(user_id).await?;

        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT ai_recipes_generated_this_month FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let (count,) =
            row.ok_or_else(|| BillingError::NotFound(format!("user {} not found", user_id)))?;
        Ok(count.max(0) as u32)
    }

    /// Zero the counter and open a new window if the current one has elapsed
    ///
    /// Compare-and-set on the stale reset instant: only one concurrent caller
    /// can win; the rest see zero rows affected and read the fresh state.
    /// Returns whether this caller performed the reset.
    pub async fn reconcile_monthly_reset(&self, user_id: Uuid) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET ai_recipes_generated_this_month = 0,
                ai_recipes_reset_date = NOW() + INTERVAL '1 month',
                updated_at = NOW()
            WHERE id = $1
              AND (ai_recipes_reset_date IS NULL OR ai_recipes_reset_date <= NOW())
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let reset = result.rows_affected() > 0;
        if reset {
            tracing::debug!(user_id = %user_id, "Monthly AI-recipe counter reset");
        }
        Ok(reset)
    }

    /// Record one consumed AI recipe and return the new count
    ///
    /// Atomic relative increment, so two concurrent consumers always add
    /// exactly two. The window is reconciled first so the unit lands in the
    /// current cycle, not a stale one about to be zeroed.
    pub async fn increment_ai_recipes(&self, user_id: Uuid) -> BillingResult<u32> {
        self.reconcile_monthly_reset(user_id).await?;

        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE users
            SET ai_recipes_generated_this_month = ai_recipes_generated_this_month + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING ai_recipes_generated_this_month
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let (count,) =
            row.ok_or_else(|| BillingError::NotFound(format!("user {} not found", user_id)))?;

        tracing::debug!(user_id = %user_id, count = count, "AI recipe consumed");
        Ok(count.max(0) as u32)
    }
}
