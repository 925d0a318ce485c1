//! Tier catalog
//!
//! Static mapping from a tier to its numeric limits and feature flags.
//! Pure lookup with no side effects; changing a limit is a deploy-time
//! configuration change, not a runtime operation.

use serde::{Serialize, Serializer};
use skillet_shared::SubscriptionTier;

/// A per-tier quota ceiling: either a finite count or the unlimited sentinel
///
/// Serializes as the number itself, or the string `"unlimited"`, so API
/// clients can render upgrade prompts directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Count(u32),
    Unlimited,
}

impl Limit {
    /// Remaining headroom given current usage, saturating at zero
    pub fn remaining(&self, usage: u32) -> Limit {
        match self {
            Limit::Count(n) => Limit::Count(n.saturating_sub(usage)),
            Limit::Unlimited => Limit::Unlimited,
        }
    }

    /// Whether one more unit of usage is permitted at `usage`
    pub fn permits(&self, usage: u32) -> bool {
        match self {
            Limit::Count(n) => usage < *n,
            Limit::Unlimited => true,
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Limit::Count(n) => serializer.serialize_u32(*n),
            Limit::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Limit::Count(n) => write!(f, "{}", n),
            Limit::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// A countable resource gated by a per-tier ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum QuotaResource {
    PantryItems,
    AiRecipesPerMonth,
    CookwareItems,
}

impl QuotaResource {
    pub const ALL: [QuotaResource; 3] = [
        QuotaResource::PantryItems,
        QuotaResource::AiRecipesPerMonth,
        QuotaResource::CookwareItems,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaResource::PantryItems => "pantryItems",
            QuotaResource::AiRecipesPerMonth => "aiRecipesPerMonth",
            QuotaResource::CookwareItems => "cookwareItems",
        }
    }
}

impl std::str::FromStr for QuotaResource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pantryItems" | "pantry_items" => Ok(QuotaResource::PantryItems),
            "aiRecipesPerMonth" | "ai_recipes_per_month" => Ok(QuotaResource::AiRecipesPerMonth),
            "cookwareItems" | "cookware_items" => Ok(QuotaResource::CookwareItems),
            other => Err(format!("unknown quota resource: {}", other)),
        }
    }
}

/// Boolean feature flags carried by a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Scanning,
    BulkScanning,
    AssistantChat,
    CustomStorageAreas,
    WeeklyMealPrepping,
}

impl Feature {
    /// Parse a feature name from request-path input
    ///
    /// Returns `None` for unknown names: an unknown feature is by definition
    /// never entitled, so callers treat `None` as "not enabled" rather than
    /// an error.
    pub fn parse(s: &str) -> Option<Feature> {
        match s {
            "scanning" => Some(Feature::Scanning),
            "bulk_scanning" | "bulkScanning" => Some(Feature::BulkScanning),
            "assistant_chat" | "assistantChat" => Some(Feature::AssistantChat),
            "custom_storage_areas" | "customStorageAreas" => Some(Feature::CustomStorageAreas),
            "weekly_meal_prepping" | "weeklyMealPrepping" => Some(Feature::WeeklyMealPrepping),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Scanning => "scanning",
            Feature::BulkScanning => "bulk_scanning",
            Feature::AssistantChat => "assistant_chat",
            Feature::CustomStorageAreas => "custom_storage_areas",
            Feature::WeeklyMealPrepping => "weekly_meal_prepping",
        }
    }
}

/// Feature flag set for a tier
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TierFeatures {
    pub scanning: bool,
    pub bulk_scanning: bool,
    pub assistant_chat: bool,
    pub custom_storage_areas: bool,
    pub weekly_meal_prepping: bool,
}

impl TierFeatures {
    pub fn has(&self, feature: Feature) -> bool {
        match feature {
            Feature::Scanning => self.scanning,
            Feature::BulkScanning => self.bulk_scanning,
            Feature::AssistantChat => self.assistant_chat,
            Feature::CustomStorageAreas => self.custom_storage_areas,
            Feature::WeeklyMealPrepping => self.weekly_meal_prepping,
        }
    }
}

/// Catalog entry: everything a tier entitles a user to
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TierLimits {
    pub max_pantry_items: Limit,
    pub max_ai_recipes_per_month: Limit,
    pub max_cookware_items: Limit,
    pub features: TierFeatures,
}

impl TierLimits {
    pub fn limit_for(&self, resource: QuotaResource) -> Limit {
        match resource {
            QuotaResource::PantryItems => self.max_pantry_items,
            QuotaResource::AiRecipesPerMonth => self.max_ai_recipes_per_month,
            QuotaResource::CookwareItems => self.max_cookware_items,
        }
    }
}

const BASIC_LIMITS: TierLimits = TierLimits {
    max_pantry_items: Limit::Count(25),
    max_ai_recipes_per_month: Limit::Count(5),
    max_cookware_items: Limit::Count(10),
    features: TierFeatures {
        scanning: true,
        bulk_scanning: false,
        assistant_chat: false,
        custom_storage_areas: false,
        weekly_meal_prepping: false,
    },
};

const PRO_LIMITS: TierLimits = TierLimits {
    max_pantry_items: Limit::Unlimited,
    max_ai_recipes_per_month: Limit::Unlimited,
    max_cookware_items: Limit::Unlimited,
    features: TierFeatures {
        scanning: true,
        bulk_scanning: true,
        assistant_chat: true,
        custom_storage_areas: true,
        weekly_meal_prepping: true,
    },
};

/// Look up the catalog entry for a tier
///
/// Total over the tier enum: every tier has exactly one entry.
pub fn limits_for(tier: SubscriptionTier) -> &'static TierLimits {
    match tier {
        SubscriptionTier::Basic => &BASIC_LIMITS,
        SubscriptionTier::Pro => &PRO_LIMITS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tier_has_a_catalog_entry() {
        for tier in SubscriptionTier::ALL {
            let limits = limits_for(tier);
            for resource in QuotaResource::ALL {
                // Each resource resolves to a concrete limit, never panics
                let _ = limits.limit_for(resource);
            }
        }
    }

    #[test]
    fn basic_limits_match_catalog() {
        let limits = limits_for(SubscriptionTier::Basic);
        assert_eq!(limits.max_pantry_items, Limit::Count(25));
        assert_eq!(limits.max_ai_recipes_per_month, Limit::Count(5));
        assert_eq!(limits.max_cookware_items, Limit::Count(10));
        assert!(limits.features.scanning);
        assert!(!limits.features.bulk_scanning);
        assert!(!limits.features.weekly_meal_prepping);
    }

    #[test]
    fn pro_is_unlimited_with_all_features() {
        let limits = limits_for(SubscriptionTier::Pro);
        for resource in QuotaResource::ALL {
            assert_eq!(limits.limit_for(resource), Limit::Unlimited);
        }
        assert!(limits.features.bulk_scanning);
        assert!(limits.features.assistant_chat);
        assert!(limits.features.custom_storage_areas);
    }

    #[test]
    fn limit_permits_and_remaining() {
        assert!(Limit::Count(25).permits(24));
        assert!(!Limit::Count(25).permits(25));
        assert!(!Limit::Count(25).permits(26));
        assert!(Limit::Unlimited.permits(u32::MAX));

        assert_eq!(Limit::Count(25).remaining(25), Limit::Count(0));
        assert_eq!(Limit::Count(25).remaining(30), Limit::Count(0));
        assert_eq!(Limit::Count(25).remaining(10), Limit::Count(15));
        assert_eq!(Limit::Unlimited.remaining(1_000_000), Limit::Unlimited);
    }

    #[test]
    fn limit_serializes_number_or_sentinel() {
        assert_eq!(serde_json::to_string(&Limit::Count(25)).unwrap(), "25");
        assert_eq!(
            serde_json::to_string(&Limit::Unlimited).unwrap(),
            "\"unlimited\""
        );
    }

    #[test]
    fn unknown_feature_name_parses_to_none() {
        assert!(Feature::parse("time_travel").is_none());
        assert_eq!(Feature::parse("bulk_scanning"), Some(Feature::BulkScanning));
        assert_eq!(Feature::parse("bulkScanning"), Some(Feature::BulkScanning));
    }

    #[test]
    fn feature_flags_resolve_per_tier() {
        let basic = limits_for(SubscriptionTier::Basic);
        assert!(basic.features.has(Feature::Scanning));
        assert!(!basic.features.has(Feature::AssistantChat));

        let pro = limits_for(SubscriptionTier::Pro);
        for feature in [
            Feature::Scanning,
            Feature::BulkScanning,
            Feature::AssistantChat,
            Feature::CustomStorageAreas,
            Feature::WeeklyMealPrepping,
        ] {
            assert!(pro.features.has(feature));
        }
    }
}
