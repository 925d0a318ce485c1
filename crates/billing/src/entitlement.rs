//! Entitlement engine
//!
//! The public quota/feature-check API. Composes the tier catalog, the usage
//! snapshot provider, and the quota cache. Answers are computed from
//! authoritative storage and cached briefly per user; the cache is never
//! consulted for writes.

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use skillet_shared::SubscriptionTier;
use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::QuotaCache;
use crate::catalog::{limits_for, Feature, Limit, QuotaResource};
use crate::error::{BillingError, BillingResult};
use crate::usage::UsageSnapshots;

/// Result of a quota check
///
/// Always carries the limit and remaining headroom so a denial can be
/// rendered as an upgrade prompt rather than a generic error.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub remaining: Limit,
    pub limit: Limit,
}

impl QuotaCheck {
    /// Pure quota decision: `allowed = usage < limit`, unlimited always allows
    pub fn evaluate(usage: u32, limit: Limit) -> QuotaCheck {
        QuotaCheck {
            allowed: limit.permits(usage),
            remaining: limit.remaining(usage),
            limit,
        }
    }
}

/// Quota and feature checks for the request path
#[derive(Clone)]
pub struct EntitlementEngine {
    pool: PgPool,
    usage: UsageSnapshots,
    cache: Arc<QuotaCache>,
}

impl EntitlementEngine {
    pub fn new(pool: PgPool, cache: Arc<QuotaCache>) -> Self {
        let usage = UsageSnapshots::new(pool.clone());
        Self { pool, usage, cache }
    }

    /// Check whether the user may consume one more unit of `resource`
    ///
    /// A missing user is a fatal `NotFound`. Storage failures propagate as
    /// transient errors; callers must treat those as deny, never as
    /// unlimited allowance.
    pub async fn check_quota(
        &self,
        user_id: Uuid,
        resource: QuotaResource,
    ) -> BillingResult<QuotaCheck> {
        if let Some(cached) = self.cache.get(user_id, resource) {
            return Ok(cached);
        }

        let tier = self.user_tier(user_id).await?;
        let limit = limits_for(tier).limit_for(resource);

        // Unlimited needs no usage read at all; an upgraded user is allowed
        // immediately, with no counter reset required.
        let check = if limit == Limit::Unlimited {
            QuotaCheck::evaluate(0, limit)
        } else {
            let usage = self.usage.usage_for(user_id, resource).await?;
            QuotaCheck::evaluate(usage, limit)
        };

        self.cache.insert(user_id, resource, check.clone());
        Ok(check)
    }

    /// Convenience wrapper taking the resource name from request input
    pub async fn check_quota_named(
        &self,
        user_id: Uuid,
        resource: &str,
    ) -> BillingResult<QuotaCheck> {
        let resource = QuotaResource::from_str(resource)
            .map_err(BillingError::Internal)?;
        self.check_quota(user_id, resource).await
    }

    /// Whether the user's tier enables a boolean feature flag
    ///
    /// An unknown feature name is never entitled, so it returns `false`
    /// rather than erroring.
    pub async fn check_feature(&self, user_id: Uuid, feature: &str) -> BillingResult<bool> {
        let Some(feature) = Feature::parse(feature) else {
            return Ok(false);
        };

        let tier = self.user_tier(user_id).await?;
        Ok(limits_for(tier).features.has(feature))
    }

    /// Record one consumed AI recipe
    ///
    /// The only mutating operation on this engine. Call it only after a
    /// generation actually completed, never speculatively, so a failed
    /// downstream step does not burn quota. Returns the new monthly count.
    pub async fn consume_ai_recipe(&self, user_id: Uuid) -> BillingResult<u32> {
        let count = self.usage.increment_ai_recipes(user_id).await?;
        self.cache.invalidate_user(user_id);
        Ok(count)
    }

    async fn user_tier(&self, user_id: Uuid) -> BillingResult<SubscriptionTier> {
        let row: Option<(String,)> = sqlx::query_as("SELECT tier FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let (tier,) =
            row.ok_or_else(|| BillingError::NotFound(format!("user {} not found", user_id)))?;

        // An unrecognized stored value falls back to the floor tier rather
        // than denying everything.
        Ok(tier.parse().unwrap_or(SubscriptionTier::lowest()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finite_limit_allows_strictly_below() {
        let check = QuotaCheck::evaluate(24, Limit::Count(25));
        assert!(check.allowed);
        assert_eq!(check.remaining, Limit::Count(1));
        assert_eq!(check.limit, Limit::Count(25));
    }

    #[test]
    fn at_limit_is_denied_with_zero_remaining() {
        // BASIC pantry scenario: 25 items against a 25 ceiling
        let check = QuotaCheck::evaluate(25, Limit::Count(25));
        assert!(!check.allowed);
        assert_eq!(check.remaining, Limit::Count(0));
        assert_eq!(check.limit, Limit::Count(25));
    }

    #[test]
    fn unlimited_allows_any_usage() {
        for usage in [0, 25, 10_000, u32::MAX] {
            let check = QuotaCheck::evaluate(usage, Limit::Unlimited);
            assert!(check.allowed);
            assert_eq!(check.remaining, Limit::Unlimited);
            assert_eq!(check.limit, Limit::Unlimited);
        }
    }

    #[test]
    fn quota_check_serializes_for_clients() {
        let denied = QuotaCheck::evaluate(25, Limit::Count(25));
        let json = serde_json::to_value(&denied).unwrap();
        assert_eq!(json["allowed"], false);
        assert_eq!(json["remaining"], 0);
        assert_eq!(json["limit"], 25);

        let unlimited = QuotaCheck::evaluate(3, Limit::Unlimited);
        let json = serde_json::to_value(&unlimited).unwrap();
        assert_eq!(json["remaining"], "unlimited");
        assert_eq!(json["limit"], "unlimited");
    }
}
