// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Entitlement and Billing System
//!
//! Tests critical boundary conditions and race conditions in:
//! - Quota evaluation boundaries (SKIL-Q01 to SKIL-Q03)
//! - Quota cache under contention (SKIL-K01)
//! - Subscription state transition matrix (SKIL-S01 to SKIL-S02)
//! - Trial lifecycle (SKIL-T01 to SKIL-T03)
//! - Access guard (SKIL-G01 to SKIL-G04)

#[cfg(test)]
mod quota_boundary_tests {
    use crate::catalog::Limit;
    use crate::entitlement::QuotaCheck;

    // =========================================================================
    // SKIL-Q01: Usage past the limit reports remaining 0, not negative
    // =========================================================================
    #[test]
    fn test_over_limit_saturates() {
        let check = QuotaCheck::evaluate(40, Limit::Count(25));
        assert!(!check.allowed);
        assert_eq!(check.remaining, Limit::Count(0));
        assert_eq!(check.limit, Limit::Count(25));
    }

    // =========================================================================
    // SKIL-Q02: Zero limit denies even zero usage
    // =========================================================================
    #[test]
    fn test_zero_limit_denies_everything() {
        let check = QuotaCheck::evaluate(0, Limit::Count(0));
        assert!(!check.allowed);
        assert_eq!(check.remaining, Limit::Count(0));
    }

    // =========================================================================
    // SKIL-Q03: Usage at u32::MAX never panics, unlimited still allows
    // =========================================================================
    #[test]
    fn test_extreme_usage_values() {
        let finite = QuotaCheck::evaluate(u32::MAX, Limit::Count(25));
        assert!(!finite.allowed);
        assert_eq!(finite.remaining, Limit::Count(0));

        let unlimited = QuotaCheck::evaluate(u32::MAX, Limit::Unlimited);
        assert!(unlimited.allowed);
    }
}

#[cfg(test)]
mod cache_contention_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Barrier;
    use uuid::Uuid;

    use crate::cache::QuotaCache;
    use crate::catalog::{Limit, QuotaResource};
    use crate::entitlement::QuotaCheck;

    // =========================================================================
    // SKIL-K01: Concurrent writers and invalidators never poison the lock
    // =========================================================================
    #[tokio::test]
    async fn test_concurrent_access_is_safe() {
        let cache = Arc::new(QuotaCache::new(Duration::from_secs(30)));
        let user = Uuid::new_v4();
        let barrier = Arc::new(Barrier::new(10));
        let mut handles = vec![];

        for i in 0..10 {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);

            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                if i % 2 == 0 {
                    cache.insert(
                        user,
                        QuotaResource::PantryItems,
                        QuotaCheck::evaluate(3, Limit::Count(25)),
                    );
                } else {
                    cache.invalidate_user(user);
                }
                cache.get(user, QuotaResource::PantryItems)
            }));
        }

        for handle in handles {
            // A hit or a miss are both fine; a panic is not
            let _ = handle.await.unwrap();
        }
    }
}

#[cfg(test)]
mod subscription_state_tests {
    use crate::subscriptions::SubscriptionStatus;

    const ALL_STATUSES: [SubscriptionStatus; 5] = [
        SubscriptionStatus::Trialing,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Canceled,
        SubscriptionStatus::Expired,
    ];

    // =========================================================================
    // SKIL-S01: Non-terminal rows accept any provider status (last write
    // wins for out-of-order deliveries)
    // =========================================================================
    #[test]
    fn test_non_terminal_accepts_everything() {
        for current in ALL_STATUSES.into_iter().filter(|s| !s.is_terminal()) {
            for next in ALL_STATUSES {
                assert!(current.accepts(next), "{:?} should accept {:?}", current, next);
            }
        }
    }

    // =========================================================================
    // SKIL-S02: Terminal rows accept only reactivation or their own replay
    // =========================================================================
    #[test]
    fn test_terminal_acceptance_matrix() {
        for current in ALL_STATUSES.into_iter().filter(|s| s.is_terminal()) {
            for next in ALL_STATUSES {
                let expected = matches!(
                    next,
                    SubscriptionStatus::Active | SubscriptionStatus::Trialing
                ) || next == current;
                assert_eq!(
                    current.accepts(next),
                    expected,
                    "{:?} accepting {:?}",
                    current,
                    next
                );
            }
        }
    }
}

#[cfg(test)]
mod trial_tests {
    use time::OffsetDateTime;

    use crate::trials::{trial_bounds, TRIAL_PERIOD_DAYS};

    // =========================================================================
    // SKIL-T01: The trial window is exactly seven days from the start
    // =========================================================================
    #[test]
    fn test_trial_window_length() {
        let now = OffsetDateTime::now_utc();
        let (start, end) = trial_bounds(now);
        assert_eq!(start, now);
        assert_eq!(end - start, time::Duration::days(TRIAL_PERIOD_DAYS));
    }

    // =========================================================================
    // SKIL-T02: A trial started just over seven days ago has lapsed; one
    // started just under has not
    // =========================================================================
    #[test]
    fn test_lapse_boundary() {
        let now = OffsetDateTime::now_utc();

        let (_, lapsed_end) =
            trial_bounds(now - time::Duration::days(TRIAL_PERIOD_DAYS) - time::Duration::seconds(1));
        assert!(lapsed_end < now);

        let (_, running_end) =
            trial_bounds(now - time::Duration::days(TRIAL_PERIOD_DAYS) + time::Duration::seconds(1));
        assert!(running_end > now);
    }

    // =========================================================================
    // SKIL-T03: Sweep summaries account for every scanned row
    // =========================================================================
    #[test]
    fn test_sweep_summary_accounting() {
        let summary = crate::trials::SweepSummary {
            scanned: 5,
            expired: 3,
            skipped: 1,
            errors: vec![(uuid::Uuid::new_v4(), "boom".to_string())],
        };
        assert_eq!(
            summary.scanned,
            summary.expired + summary.skipped + summary.errors.len()
        );
    }
}

#[cfg(test)]
mod guard_tests {
    use crate::catalog::Limit;
    use crate::entitlement::QuotaCheck;
    use crate::guard::{AccessDecision, Denial, UpgradeInfo};

    // =========================================================================
    // SKIL-G01: Exhausted quota denies with the data an upgrade prompt needs
    // =========================================================================
    #[test]
    fn test_exhausted_quota_denial_payload() {
        let check = QuotaCheck::evaluate(25, Limit::Count(25));
        let decision = AccessDecision::from_quota(&check);
        match decision {
            AccessDecision::Denied(Denial::UpgradeRequired(UpgradeInfo { limit, remaining })) => {
                assert_eq!(limit, Limit::Count(25));
                assert_eq!(remaining, Limit::Count(0));
            }
            other => panic!("expected upgrade denial, got {:?}", other),
        }
    }

    // =========================================================================
    // SKIL-G02: Unlimited quota always grants
    // =========================================================================
    #[test]
    fn test_unlimited_grants() {
        let check = QuotaCheck::evaluate(u32::MAX, Limit::Unlimited);
        assert!(AccessDecision::from_quota(&check).is_granted());
    }

    // =========================================================================
    // SKIL-G03: Disabled feature flags deny as upgrade-required
    // =========================================================================
    #[test]
    fn test_disabled_feature_denies() {
        match AccessDecision::from_feature(false) {
            AccessDecision::Denied(Denial::UpgradeRequired(_)) => {}
            other => panic!("expected upgrade denial, got {:?}", other),
        }
    }

    // =========================================================================
    // SKIL-G04: Unavailable denials serialize distinctly from upgrade ones
    // =========================================================================
    #[test]
    fn test_unavailable_serialization() {
        let unavailable =
            serde_json::to_value(AccessDecision::Denied(Denial::Unavailable)).unwrap();
        let upgrade = serde_json::to_value(AccessDecision::from_feature(false)).unwrap();
        assert_eq!(unavailable["reason"], "unavailable");
        assert_eq!(upgrade["reason"], "upgrade_required");
    }
}
