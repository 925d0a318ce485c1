//! Subscription record store and state machine
//!
//! The authoritative local mirror of one subscription per user. Rows are
//! created once (at signup or first checkout) and then only ever replaced in
//! place by upsert, never deleted, so the "current" state is always a single
//! row. Only the webhook reconciler and the trial lifecycle manager mutate
//! this table; request-path code reads it indirectly through the user
//! authorization mirror.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use skillet_shared::{PlanType, SubscriptionTier};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::cache::QuotaCache;
use crate::error::{BillingError, BillingResult};

/// Local subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Terminal for the current billing cycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Canceled | SubscriptionStatus::Expired)
    }

    /// Whether a provider-reported status may replace this one
    ///
    /// Non-terminal rows take the last committed write as-is. Terminal rows
    /// stop processing further transitions, except a fresh `active` or
    /// `trialing` when the user resubscribes (and the idempotent replay of
    /// the terminal state itself).
    pub fn accepts(&self, next: SubscriptionStatus) -> bool {
        if !self.is_terminal() {
            return true;
        }
        matches!(
            next,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        ) || next == *self
    }

    /// Map the provider's status onto the local enum
    pub fn from_stripe(status: stripe::SubscriptionStatus) -> SubscriptionStatus {
        use stripe::SubscriptionStatus as S;
        match status {
            S::Trialing => SubscriptionStatus::Trialing,
            S::Active => SubscriptionStatus::Active,
            S::PastDue | S::Incomplete | S::Paused => SubscriptionStatus::PastDue,
            S::Canceled => SubscriptionStatus::Canceled,
            S::Unpaid | S::IncompleteExpired => SubscriptionStatus::Expired,
        }
    }

    /// Tier written to the user mirror for this status
    ///
    /// Degrade gracefully: `past_due` keeps the paid tier while the provider
    /// retries payment; only the terminal states demote to the floor.
    pub fn mirrored_tier(&self, paid_tier: SubscriptionTier) -> SubscriptionTier {
        if self.is_terminal() {
            SubscriptionTier::lowest()
        } else {
            paid_tier
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(format!("unknown subscription status: {}", other)),
        }
    }
}

/// One subscription row as persisted
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub plan_type: String,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_price_id: Option<String>,
}

impl SubscriptionRecord {
    pub fn parsed_status(&self) -> Option<SubscriptionStatus> {
        self.status.parse().ok()
    }
}

/// Fully re-derived subscription state from one provider event
///
/// The reconciler always builds the whole row from the event itself, never
/// increments relative to prior local state; that is what makes replaying
/// the same event idempotent.
#[derive(Debug, Clone)]
pub struct ProviderSnapshot {
    pub status: SubscriptionStatus,
    pub tier: SubscriptionTier,
    pub plan_type: PlanType,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_price_id: Option<String>,
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, status, plan_type, \
     current_period_start, current_period_end, trial_start, trial_end, \
     cancel_at_period_end, canceled_at, stripe_customer_id, \
     stripe_subscription_id, stripe_price_id";

/// Store for the per-user subscription row and its authorization mirror
#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
    cache: Arc<QuotaCache>,
}

impl SubscriptionService {
    pub fn new(pool: PgPool, cache: Arc<QuotaCache>) -> Self {
        Self { pool, cache }
    }

    /// Fetch the current subscription row for a user, if any
    pub async fn get(&self, user_id: Uuid) -> BillingResult<Option<SubscriptionRecord>> {
        let row: Option<SubscriptionRecord> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Resolve a Stripe customer id back to the local user
    pub async fn find_user_by_customer(&self, customer_id: &str) -> BillingResult<Option<Uuid>> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM users WHERE stripe_customer_id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id,)| id))
    }

    /// Upsert the subscription row from a provider snapshot and rewrite the
    /// user authorization mirror in the same transaction
    ///
    /// Insert-or-update keyed on the user id unique constraint, never a
    /// duplicate row. A terminal row that does not accept the incoming
    /// status is returned unchanged.
    pub async fn upsert_from_provider(
        &self,
        user_id: Uuid,
        snapshot: &ProviderSnapshot,
    ) -> BillingResult<SubscriptionRecord> {
        let mut tx = self.pool.begin().await?;

        // Row lock so a racing reconciler/sweep write serializes here and
        // last-committed-write-wins holds at row granularity.
        let current_status: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM subscriptions WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((status_str,)) = &current_status {
            let current = status_str.parse::<SubscriptionStatus>().ok();
            if let Some(current) = current {
                if !current.accepts(snapshot.status) {
                    tracing::info!(
                        user_id = %user_id,
                        current_status = %current,
                        incoming_status = %snapshot.status,
                        "Terminal subscription row does not accept incoming status, skipping"
                    );
                    tx.rollback().await?;
                    return self.get(user_id).await?.ok_or_else(|| {
                        BillingError::NotFound(format!("subscription for user {}", user_id))
                    });
                }
            }
        }

        let record: SubscriptionRecord = sqlx::query_as(&format!(
            r#"
            INSERT INTO subscriptions (
                user_id, status, plan_type, current_period_start, current_period_end,
                trial_start, trial_end, cancel_at_period_end, canceled_at,
                stripe_customer_id, stripe_subscription_id, stripe_price_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (user_id) DO UPDATE SET
                status = EXCLUDED.status,
                plan_type = EXCLUDED.plan_type,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                trial_start = EXCLUDED.trial_start,
                trial_end = EXCLUDED.trial_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                canceled_at = EXCLUDED.canceled_at,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                stripe_price_id = EXCLUDED.stripe_price_id,
                updated_at = NOW()
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .bind(snapshot.status.as_str())
        .bind(snapshot.plan_type.as_str())
        .bind(snapshot.current_period_start)
        .bind(snapshot.current_period_end)
        .bind(snapshot.trial_start)
        .bind(snapshot.trial_end)
        .bind(snapshot.cancel_at_period_end)
        .bind(snapshot.canceled_at)
        .bind(snapshot.stripe_customer_id.as_deref())
        .bind(snapshot.stripe_subscription_id.as_deref())
        .bind(snapshot.stripe_price_id.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        // The mirror is a cache of convenience: rewrite it from the row we
        // just committed so the two can never drift within this operation.
        let mirrored_tier = snapshot.status.mirrored_tier(snapshot.tier);
        sqlx::query(
            r#"
            UPDATE users
            SET tier = $1,
                subscription_status = $2,
                trial_ends_at = $3,
                updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(mirrored_tier.as_str())
        .bind(snapshot.status.as_str())
        .bind(snapshot.trial_end)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        // Any cached quota answer may now be stale
        self.cache.invalidate_user(user_id);

        tracing::info!(
            user_id = %user_id,
            status = %snapshot.status,
            tier = %mirrored_tier,
            plan = %snapshot.plan_type,
            "Subscription row upserted and mirror rewritten"
        );

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_round_trip() {
        for status in [
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>(), Ok(status));
        }
    }

    #[test]
    fn terminal_states() {
        assert!(SubscriptionStatus::Canceled.is_terminal());
        assert!(SubscriptionStatus::Expired.is_terminal());
        assert!(!SubscriptionStatus::Trialing.is_terminal());
        assert!(!SubscriptionStatus::Active.is_terminal());
        assert!(!SubscriptionStatus::PastDue.is_terminal());
    }

    #[test]
    fn non_terminal_rows_take_last_write() {
        assert!(SubscriptionStatus::Trialing.accepts(SubscriptionStatus::Active));
        assert!(SubscriptionStatus::Trialing.accepts(SubscriptionStatus::Expired));
        assert!(SubscriptionStatus::Active.accepts(SubscriptionStatus::PastDue));
        assert!(SubscriptionStatus::PastDue.accepts(SubscriptionStatus::Active));
        assert!(SubscriptionStatus::Active.accepts(SubscriptionStatus::Canceled));
    }

    #[test]
    fn terminal_rows_only_accept_resubscribe() {
        assert!(SubscriptionStatus::Canceled.accepts(SubscriptionStatus::Active));
        assert!(SubscriptionStatus::Canceled.accepts(SubscriptionStatus::Trialing));
        assert!(!SubscriptionStatus::Canceled.accepts(SubscriptionStatus::PastDue));
        assert!(!SubscriptionStatus::Canceled.accepts(SubscriptionStatus::Expired));
        assert!(!SubscriptionStatus::Expired.accepts(SubscriptionStatus::PastDue));
        assert!(SubscriptionStatus::Expired.accepts(SubscriptionStatus::Active));
        // Replaying the terminal event itself is an idempotent no-op accept
        assert!(SubscriptionStatus::Canceled.accepts(SubscriptionStatus::Canceled));
    }

    #[test]
    fn stripe_status_mapping() {
        use stripe::SubscriptionStatus as S;
        assert_eq!(
            SubscriptionStatus::from_stripe(S::Active),
            SubscriptionStatus::Active
        );
        assert_eq!(
            SubscriptionStatus::from_stripe(S::Trialing),
            SubscriptionStatus::Trialing
        );
        assert_eq!(
            SubscriptionStatus::from_stripe(S::PastDue),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            SubscriptionStatus::from_stripe(S::Incomplete),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            SubscriptionStatus::from_stripe(S::Canceled),
            SubscriptionStatus::Canceled
        );
        assert_eq!(
            SubscriptionStatus::from_stripe(S::Unpaid),
            SubscriptionStatus::Expired
        );
        assert_eq!(
            SubscriptionStatus::from_stripe(S::IncompleteExpired),
            SubscriptionStatus::Expired
        );
    }

    #[test]
    fn past_due_keeps_paid_tier_terminal_demotes() {
        // Degrade-gracefully policy: a payment retry window keeps the tier
        assert_eq!(
            SubscriptionStatus::PastDue.mirrored_tier(SubscriptionTier::Pro),
            SubscriptionTier::Pro
        );
        assert_eq!(
            SubscriptionStatus::Active.mirrored_tier(SubscriptionTier::Pro),
            SubscriptionTier::Pro
        );
        assert_eq!(
            SubscriptionStatus::Canceled.mirrored_tier(SubscriptionTier::Pro),
            SubscriptionTier::Basic
        );
        assert_eq!(
            SubscriptionStatus::Expired.mirrored_tier(SubscriptionTier::Pro),
            SubscriptionTier::Basic
        );
    }
}
