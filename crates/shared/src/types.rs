//! Cross-crate billing types

use serde::{Deserialize, Serialize};

/// Subscription tier for a user
///
/// Stored lowercase in `users.tier` and in Stripe metadata. `Basic` is the
/// floor every user falls back to when a subscription ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Basic,
    Pro,
}

impl SubscriptionTier {
    /// All tiers, in ascending order of entitlement
    pub const ALL: [SubscriptionTier; 2] = [SubscriptionTier::Basic, SubscriptionTier::Pro];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Basic => "basic",
            SubscriptionTier::Pro => "pro",
        }
    }

    /// The tier users are demoted to when a trial lapses or a subscription ends
    pub fn lowest() -> Self {
        SubscriptionTier::Basic
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(SubscriptionTier::Basic),
            "pro" => Ok(SubscriptionTier::Pro),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// Billing interval for a paid plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Monthly,
    Annual,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Monthly => "monthly",
            PlanType::Annual => "annual",
        }
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PlanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" | "month" => Ok(PlanType::Monthly),
            "annual" | "year" | "yearly" => Ok(PlanType::Annual),
            other => Err(format!("unknown plan type: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn tier_round_trips_through_strings() {
        for tier in SubscriptionTier::ALL {
            assert_eq!(SubscriptionTier::from_str(tier.as_str()).unwrap(), tier);
        }
        assert!(SubscriptionTier::from_str("platinum").is_err());
    }

    #[test]
    fn plan_type_accepts_stripe_interval_names() {
        assert_eq!(PlanType::from_str("month").unwrap(), PlanType::Monthly);
        assert_eq!(PlanType::from_str("year").unwrap(), PlanType::Annual);
        assert_eq!(PlanType::from_str("annual").unwrap(), PlanType::Annual);
    }

    #[test]
    fn lowest_tier_is_basic() {
        assert_eq!(SubscriptionTier::lowest(), SubscriptionTier::Basic);
    }
}
