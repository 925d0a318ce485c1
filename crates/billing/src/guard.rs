//! Access guard for quota- and feature-gated operations
//!
//! Single choke point callers hit before performing a gated action. The
//! guard fails closed: when the backing store is unreachable the answer is
//! a retryable denial, never a grant.

use serde::Serialize;
use uuid::Uuid;

use crate::catalog::Limit;
use crate::entitlement::{EntitlementEngine, QuotaCheck};
use crate::error::{BillingError, BillingResult};

/// What a caller wants to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// Add one unit of a countable resource
    Quota(crate::catalog::QuotaResource),
    /// Use a boolean-gated feature
    Feature(crate::catalog::Feature),
}

/// Data the caller needs to render an upgrade prompt
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UpgradeInfo {
    pub limit: Limit,
    pub remaining: Limit,
}

/// Why access was denied
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Denial {
    /// The tier does not cover the capability; upgrading would
    UpgradeRequired(UpgradeInfo),
    /// Transient backend failure, the caller should retry
    Unavailable,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    Granted,
    Denied(Denial),
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted)
    }

    /// Map a quota check onto a decision
    pub fn from_quota(check: &QuotaCheck) -> Self {
        if check.allowed {
            AccessDecision::Granted
        } else {
            AccessDecision::Denied(Denial::UpgradeRequired(UpgradeInfo {
                limit: check.limit,
                remaining: check.remaining,
            }))
        }
    }

    /// Map a feature flag onto a decision; denied features carry no
    /// numeric headroom
    pub fn from_feature(enabled: bool) -> Self {
        if enabled {
            AccessDecision::Granted
        } else {
            AccessDecision::Denied(Denial::UpgradeRequired(UpgradeInfo {
                limit: Limit::Count(0),
                remaining: Limit::Count(0),
            }))
        }
    }
}

/// Guard over the entitlement engine
pub struct AccessGuard {
    entitlements: EntitlementEngine,
}

impl AccessGuard {
    pub fn new(entitlements: EntitlementEngine) -> Self {
        Self { entitlements }
    }

    /// Decide whether `user_id` may exercise `capability` right now
    ///
    /// Unknown users are a hard error. Transient failures become
    /// `Denied(Unavailable)` so a flaky database can never over-grant.
    pub async fn authorize(
        &self,
        user_id: Uuid,
        capability: &Capability,
    ) -> BillingResult<AccessDecision> {
        let outcome = match capability {
            Capability::Quota(resource) => self
                .entitlements
                .check_quota(user_id, *resource)
                .await
                .map(|check| AccessDecision::from_quota(&check)),
            Capability::Feature(feature) => self
                .entitlements
                .check_feature(user_id, feature.as_str())
                .await
                .map(AccessDecision::from_feature),
        };

        match outcome {
            Ok(decision) => {
                if let AccessDecision::Denied(denial) = &decision {
                    tracing::info!(
                        user_id = %user_id,
                        capability = ?capability,
                        denial = ?denial,
                        "Access denied"
                    );
                }
                Ok(decision)
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    user_id = %user_id,
                    capability = ?capability,
                    error = %e,
                    "Entitlement backend unavailable, denying access"
                );
                Ok(AccessDecision::Denied(Denial::Unavailable))
            }
            Err(e) => Err(e),
        }
    }

    /// Convenience for callers that only want a boolean and treat
    /// unknown users the same as denied
    pub async fn is_allowed(&self, user_id: Uuid, capability: &Capability) -> bool {
        match self.authorize(user_id, capability).await {
            Ok(decision) => decision.is_granted(),
            Err(BillingError::NotFound(_)) => false,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Authorization check failed");
                false
            }
        }
    }
}

