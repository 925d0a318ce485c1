//! Price-to-tier resolution
//!
//! Maps a provider price id onto a local tier and billing interval. The
//! configured price ids answer without I/O; anything else is looked up once
//! against the Stripe API (under a bounded timeout) and cached for the
//! process lifetime, since a price's tier never changes after creation.

use std::collections::HashMap;
use std::sync::RwLock;

use skillet_shared::{PlanType, SubscriptionTier};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// A price id resolved to its local meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPrice {
    pub tier: SubscriptionTier,
    pub plan_type: PlanType,
}

/// Per-process resolver with a price-id cache
pub struct PriceResolver {
    stripe: StripeClient,
    cache: RwLock<HashMap<String, ResolvedPrice>>,
}

impl PriceResolver {
    pub fn new(stripe: StripeClient) -> Self {
        Self {
            stripe,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a price id, consulting config, then the cache, then Stripe
    ///
    /// The outbound call is bounded by the configured API timeout so a slow
    /// provider cannot hold a webhook delivery open.
    pub async fn resolve(&self, price_id: &str) -> BillingResult<ResolvedPrice> {
        if let Some((tier, plan_type)) = self.stripe.config().plan_for_price_id(price_id) {
            return Ok(ResolvedPrice { tier, plan_type });
        }

        if let Some(cached) = self
            .cache
            .read()
            .ok()
            .and_then(|cache| cache.get(price_id).copied())
        {
            return Ok(cached);
        }

        let resolved = self.fetch_from_stripe(price_id).await?;

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(price_id.to_string(), resolved);
        }

        tracing::info!(
            price_id = %price_id,
            tier = %resolved.tier,
            plan = %resolved.plan_type,
            "Resolved price id via Stripe lookup"
        );

        Ok(resolved)
    }

    async fn fetch_from_stripe(&self, price_id: &str) -> BillingResult<ResolvedPrice> {
        let parsed_id = price_id
            .parse::<stripe::PriceId>()
            .map_err(|e| BillingError::UnknownPrice(format!("{}: {}", price_id, e)))?;

        let timeout = self.stripe.config().api_timeout;
        let price = tokio::time::timeout(
            timeout,
            stripe::Price::retrieve(self.stripe.inner(), &parsed_id, &[]),
        )
        .await
        .map_err(|_| {
            BillingError::StripeTimeout(format!("price lookup for {} timed out", price_id))
        })??;

        let tier = price
            .lookup_key
            .as_deref()
            .and_then(tier_from_label)
            .or_else(|| price.nickname.as_deref().and_then(tier_from_label))
            .ok_or_else(|| BillingError::UnknownPrice(price_id.to_string()))?;

        let plan_type = price
            .recurring
            .as_ref()
            .map(|recurring| plan_type_from_interval(recurring.interval))
            .unwrap_or(PlanType::Monthly);

        Ok(ResolvedPrice { tier, plan_type })
    }
}

/// Extract a tier from a price label ("pro_monthly", "Pro Annual", ...)
fn tier_from_label(label: &str) -> Option<SubscriptionTier> {
    let label = label.to_lowercase();
    SubscriptionTier::ALL
        .into_iter()
        .rev()
        .find(|tier| label.contains(tier.as_str()))
}

fn plan_type_from_interval(interval: stripe::RecurringInterval) -> PlanType {
    match interval {
        stripe::RecurringInterval::Year => PlanType::Annual,
        stripe::RecurringInterval::Month => PlanType::Monthly,
        other => {
            tracing::warn!(interval = ?other, "Unexpected price interval, treating as monthly");
            PlanType::Monthly
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_parsed_from_price_labels() {
        assert_eq!(tier_from_label("pro_monthly"), Some(SubscriptionTier::Pro));
        assert_eq!(tier_from_label("Pro Annual"), Some(SubscriptionTier::Pro));
        assert_eq!(tier_from_label("basic"), Some(SubscriptionTier::Basic));
        assert_eq!(tier_from_label("legacy_plan"), None);
    }

    #[test]
    fn interval_maps_to_plan_type() {
        assert_eq!(
            plan_type_from_interval(stripe::RecurringInterval::Month),
            PlanType::Monthly
        );
        assert_eq!(
            plan_type_from_interval(stripe::RecurringInterval::Year),
            PlanType::Annual
        );
        assert_eq!(
            plan_type_from_interval(stripe::RecurringInterval::Week),
            PlanType::Monthly
        );
    }
}
