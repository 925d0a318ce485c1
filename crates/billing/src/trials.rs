//! Trial lifecycle
//!
//! Creates the trialing subscription row at signup and demotes trials the
//! provider never confirmed. The demotion path is only ever invoked by the
//! periodic sweep, and only for rows still `trialing` at read time; a row
//! the reconciler has already moved to `active` is invisible to the sweep's
//! query, so the common race resolves without explicit locking.

use std::sync::Arc;

use skillet_shared::{PlanType, SubscriptionTier};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::cache::QuotaCache;
use crate::error::{BillingError, BillingResult};
use crate::subscriptions::{SubscriptionRecord, SubscriptionStatus};

/// Trial window granted at signup
pub const TRIAL_PERIOD_DAYS: i64 = 7;

/// Trial window bounds starting at `now`
pub fn trial_bounds(now: OffsetDateTime) -> (OffsetDateTime, OffsetDateTime) {
    (now, now + Duration::days(TRIAL_PERIOD_DAYS))
}

/// Outcome of one sweep run
#[derive(Debug, Default)]
pub struct SweepSummary {
    /// Lapsed trialing rows the query returned
    pub scanned: usize,
    /// Rows actually demoted to expired
    pub expired: usize,
    /// Rows that were no longer trialing by the time we wrote
    pub skipped: usize,
    /// Per-row failures; one bad row never aborts the batch
    pub errors: Vec<(Uuid, String)>,
}

#[derive(Clone)]
pub struct TrialService {
    pool: PgPool,
    cache: Arc<QuotaCache>,
}

impl TrialService {
    pub fn new(pool: PgPool, cache: Arc<QuotaCache>) -> Self {
        Self { pool, cache }
    }

    /// Create the trialing subscription row for a new signup
    ///
    /// Idempotent: if any row already exists for the user (trialing or not),
    /// it is returned unchanged. An existing paid subscription is never
    /// clobbered back to trialing.
    pub async fn create_trial(
        &self,
        user_id: Uuid,
        plan: PlanType,
    ) -> BillingResult<SubscriptionRecord> {
        let (trial_start, trial_end) = trial_bounds(OffsetDateTime::now_utc());

        let mut tx = self.pool.begin().await?;

        let inserted: Option<SubscriptionRecord> = sqlx::query_as(
            r#"
            INSERT INTO subscriptions (
                user_id, status, plan_type, current_period_start, current_period_end,
                trial_start, trial_end
            )
            VALUES ($1, 'trialing', $2, $3, $4, $3, $4)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING id, user_id, status, plan_type, current_period_start,
                      current_period_end, trial_start, trial_end,
                      cancel_at_period_end, canceled_at, stripe_customer_id,
                      stripe_subscription_id, stripe_price_id
            "#,
        )
        .bind(user_id)
        .bind(plan.as_str())
        .bind(trial_start)
        .bind(trial_end)
        .fetch_optional(&mut *tx)
        .await?;

        let record = match inserted {
            Some(record) => {
                // Trials run at the paid tier; the sweep demotes if the
                // provider never confirms a conversion.
                sqlx::query(
                    r#"
                    UPDATE users
                    SET tier = $1,
                        subscription_status = 'trialing',
                        trial_ends_at = $2,
                        updated_at = NOW()
                    WHERE id = $3
                    "#,
                )
                .bind(SubscriptionTier::Pro.as_str())
                .bind(trial_end)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                self.cache.invalidate_user(user_id);

                tracing::info!(
                    user_id = %user_id,
                    plan = %plan,
                    trial_end = %trial_end,
                    "Trial subscription created"
                );
                record
            }
            None => {
                // Duplicate signup path: leave the existing row alone
                tx.rollback().await?;
                let existing: Option<SubscriptionRecord> = sqlx::query_as(
                    r#"
                    SELECT id, user_id, status, plan_type, current_period_start,
                           current_period_end, trial_start, trial_end,
                           cancel_at_period_end, canceled_at, stripe_customer_id,
                           stripe_subscription_id, stripe_price_id
                    FROM subscriptions WHERE user_id = $1
                    "#,
                )
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

                existing.ok_or_else(|| {
                    BillingError::Conflict(format!(
                        "subscription for user {} vanished during trial create",
                        user_id
                    ))
                })?
            }
        };

        Ok(record)
    }

    /// Demote a lapsed trial to expired and downgrade the mirrored tier
    ///
    /// Conditional on the row still being `trialing`: a reconciler write
    /// that confirmed a paid conversion in the meantime makes this a no-op.
    /// Returns whether the row was actually expired.
    pub async fn expire_trial(&self, user_id: Uuid) -> BillingResult<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = NOW()
            WHERE user_id = $1 AND status = 'trialing'
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            tracing::debug!(
                user_id = %user_id,
                "Trial no longer trialing at write time, leaving row alone"
            );
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE users
            SET tier = $1,
                subscription_status = $2,
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(SubscriptionTier::lowest().as_str())
        .bind(SubscriptionStatus::Expired.as_str())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.cache.invalidate_user(user_id);

        tracing::info!(user_id = %user_id, "Trial expired, user demoted to basic");
        Ok(true)
    }

    /// One sweep pass: expire every trial whose window has elapsed
    ///
    /// Per-row failures are collected and logged, never thrown past, so one
    /// bad row does not abort the batch.
    pub async fn expire_lapsed_trials(&self) -> BillingResult<SweepSummary> {
        let lapsed: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT user_id FROM subscriptions
            WHERE status = 'trialing'
              AND trial_end IS NOT NULL
              AND trial_end < NOW()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = SweepSummary {
            scanned: lapsed.len(),
            ..SweepSummary::default()
        };

        for (user_id,) in lapsed {
            match self.expire_trial(user_id).await {
                Ok(true) => summary.expired += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        user_id = %user_id,
                        error = %e,
                        "Failed to expire lapsed trial"
                    );
                    summary.errors.push((user_id, e.to_string()));
                }
            }
        }

        tracing::info!(
            scanned = summary.scanned,
            expired = summary.expired,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "Trial expiration sweep complete"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_window_is_seven_days() {
        let now = OffsetDateTime::now_utc();
        let (start, end) = trial_bounds(now);
        assert_eq!(start, now);
        assert_eq!(end - start, Duration::days(7));
    }
}
