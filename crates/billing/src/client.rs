//! Stripe client and configuration

use std::sync::Arc;
use std::time::Duration;

use skillet_shared::{PlanType, SubscriptionTier};

use crate::error::{BillingError, BillingResult};

/// Configured Stripe price ids for the paid tier
#[derive(Debug, Clone)]
pub struct PriceIds {
    pub pro_monthly: String,
    pub pro_annual: String,
}

/// Stripe configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_ids: PriceIds,
    /// Bound on outbound provider calls made from the webhook path
    pub api_timeout: Duration,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY must be set".to_string()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET must be set".to_string()))?;
        let pro_monthly = std::env::var("STRIPE_PRICE_PRO_MONTHLY")
            .map_err(|_| BillingError::Config("STRIPE_PRICE_PRO_MONTHLY must be set".to_string()))?;
        let pro_annual = std::env::var("STRIPE_PRICE_PRO_ANNUAL")
            .map_err(|_| BillingError::Config("STRIPE_PRICE_PRO_ANNUAL must be set".to_string()))?;

        let api_timeout = std::env::var("STRIPE_API_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(10));

        Ok(Self {
            secret_key,
            webhook_secret,
            price_ids: PriceIds {
                pro_monthly,
                pro_annual,
            },
            api_timeout,
        })
    }

    /// Resolve a configured price id to its tier and billing interval
    pub fn plan_for_price_id(&self, price_id: &str) -> Option<(SubscriptionTier, PlanType)> {
        if price_id == self.price_ids.pro_monthly {
            Some((SubscriptionTier::Pro, PlanType::Monthly))
        } else if price_id == self.price_ids.pro_annual {
            Some((SubscriptionTier::Pro, PlanType::Annual))
        } else {
            None
        }
    }
}

/// Shared handle to the Stripe API client and its configuration
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_test".to_string(),
            price_ids: PriceIds {
                pro_monthly: "price_pro_month".to_string(),
                pro_annual: "price_pro_year".to_string(),
            },
            api_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn configured_prices_resolve() {
        let config = test_config();
        assert_eq!(
            config.plan_for_price_id("price_pro_month"),
            Some((SubscriptionTier::Pro, PlanType::Monthly))
        );
        assert_eq!(
            config.plan_for_price_id("price_pro_year"),
            Some((SubscriptionTier::Pro, PlanType::Annual))
        );
        assert_eq!(config.plan_for_price_id("price_other"), None);
    }
}
