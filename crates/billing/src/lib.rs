// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::result_large_err)] // BillingError variants carry descriptive payloads
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Skillet Billing Module
//!
//! Handles the Stripe integration for subscriptions, trials, and the
//! entitlement layer that gates tier-limited functionality.
//!
//! ## Features
//!
//! - **Tier Catalog**: Static per-tier quota limits and feature flags
//! - **Entitlements**: Quota and feature checks with a short-TTL cache
//! - **Usage Tracking**: Pantry/cookware counts and monthly AI recipe metering
//! - **Subscriptions**: Provider-state mirror with terminal-state protection
//! - **Trials**: 7-day pro trials and the lapsed-trial expiration sweep
//! - **Access Guard**: Fail-closed authorization choke point
//! - **Webhooks**: Idempotent, out-of-order-tolerant Stripe event reconciliation

pub mod cache;
pub mod catalog;
pub mod client;
pub mod entitlement;
pub mod error;
pub mod guard;
pub mod pricing;
pub mod subscriptions;
pub mod trials;
pub mod usage;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Cache
pub use cache::{QuotaCache, QUOTA_CACHE_TTL};

// Catalog
pub use catalog::{limits_for, Feature, Limit, QuotaResource, TierFeatures, TierLimits};

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Entitlement
pub use entitlement::{EntitlementEngine, QuotaCheck};

// Error
pub use error::{BillingError, BillingResult};

// Guard
pub use guard::{AccessDecision, AccessGuard, Capability, Denial, UpgradeInfo};

// Pricing
pub use pricing::{PriceResolver, ResolvedPrice};

// Subscriptions
pub use subscriptions::{
    ProviderSnapshot, SubscriptionRecord, SubscriptionService, SubscriptionStatus,
};

// Trials
pub use trials::{SweepSummary, TrialService, TRIAL_PERIOD_DAYS};

// Usage
pub use usage::UsageSnapshots;

// Webhooks
pub use webhooks::{WebhookEventRecord, WebhookHandler, WebhookReplayResult};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
///
/// Every sub-service shares one quota cache so a write through any of
/// them invalidates reads through all of them.
pub struct BillingService {
    pub entitlements: EntitlementEngine,
    pub guard: AccessGuard,
    pub subscriptions: SubscriptionService,
    pub trials: TrialService,
    pub usage: UsageSnapshots,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::build(stripe, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::build(StripeClient::new(config), pool)
    }

    fn build(stripe: StripeClient, pool: PgPool) -> Self {
        let cache = Arc::new(QuotaCache::default());

        let entitlements = EntitlementEngine::new(pool.clone(), cache.clone());
        Self {
            guard: AccessGuard::new(entitlements.clone()),
            entitlements,
            subscriptions: SubscriptionService::new(pool.clone(), cache.clone()),
            trials: TrialService::new(pool.clone(), cache.clone()),
            usage: UsageSnapshots::new(pool.clone()),
            webhooks: WebhookHandler::new(stripe, pool, cache),
        }
    }
}
