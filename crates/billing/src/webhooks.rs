//! Stripe webhook reconciliation
//!
//! Consumes provider events at-least-once and possibly out of order, and
//! reconciles the local subscription row and user authorization mirror.
//! Every handler re-derives full state from the event rather than applying
//! a delta, so replaying a delivery is idempotent; the event ledger makes
//! duplicate claims explicit. Ordering beyond last-committed-write-wins is
//! deliberately not assumed.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use skillet_shared::{PlanType, SubscriptionTier};
use sqlx::PgPool;
use stripe::{Event, EventObject, EventType, Invoice, Subscription, Webhook};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::cache::QuotaCache;
use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::pricing::{PriceResolver, ResolvedPrice};
use crate::subscriptions::{
    ProviderSnapshot, SubscriptionRecord, SubscriptionService, SubscriptionStatus,
};

type HmacSha256 = Hmac<Sha256>;

/// Tolerated clock skew between the delivery timestamp and our clock
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Stuck 'processing' claims older than this can be re-claimed
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
    subscriptions: SubscriptionService,
    prices: Arc<PriceResolver>,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: PgPool, cache: Arc<QuotaCache>) -> Self {
        let subscriptions = SubscriptionService::new(pool.clone(), cache);
        let prices = Arc::new(PriceResolver::new(stripe.clone()));
        Self {
            stripe,
            pool,
            subscriptions,
            prices,
        }
    }

    /// Verify and parse a Stripe webhook delivery
    ///
    /// Tries the library verifier first, then falls back to manual HMAC
    /// verification to work around async-stripe version incompatibility with
    /// newer Stripe API versions.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "Standard webhook parsing failed, trying manual verification"
                );
            }
        }

        // Parse the signature header: t=timestamp,v1=signature,v0=signature
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;

        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
        let v1_signature = v1_signature.ok_or(BillingError::WebhookSignatureInvalid)?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::error!(
                timestamp = timestamp,
                now = now,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let computed = compute_signature(webhook_secret, timestamp, payload)
            .ok_or(BillingError::WebhookSignatureInvalid)?;

        if computed != v1_signature {
            tracing::error!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        Ok(event)
    }

    /// Handle a verified Stripe event
    ///
    /// Atomic idempotency: INSERT...ON CONFLICT...RETURNING claims exclusive
    /// processing rights, so two concurrent deliveries of the same event id
    /// cannot both pass an EXISTS check. Claims stuck in 'processing' past
    /// the timeout are recoverable, and rows that last ended in 'error' are
    /// reclaimed too, so a provider redelivery retries a failed event
    /// instead of being dropped as a duplicate.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let event_type_str = event.type_.to_string();

        let event_timestamp = OffsetDateTime::from_unix_timestamp(event.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (stripe_event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = CONCAT(
                    'Reclaimed at ', NOW()::TEXT, '; was: ',
                    COALESCE(stripe_webhook_events.error_message, 'stuck in processing')
                )
            WHERE stripe_webhook_events.processing_result = 'error'
               OR (stripe_webhook_events.processing_result = 'processing'
                   AND stripe_webhook_events.processing_started_at < NOW() - ($4 || ' minutes')::INTERVAL)
            RETURNING id
            "#,
        )
        .bind(&event_id)
        .bind(&event_type_str)
        .bind(event_timestamp)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to claim webhook event for processing"
            );
            BillingError::Database(e.to_string())
        })?;

        if claimed.is_none() {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type_str,
                "Duplicate webhook event, already claimed or processed"
            );
            return Ok(());
        }

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Processing Stripe webhook event"
        );

        let result = self.process_event_internal(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success".to_string(), None),
            Err(e) => ("error".to_string(), Some(e.to_string())),
        };

        // Record the outcome; the ledger is what makes failed events
        // visible for reprocessing, so retry the audit write once.
        let update_result = self
            .record_outcome(&event_id, &processing_result, error_message.as_deref())
            .await;

        if let Err(e) = update_result {
            tracing::warn!(
                event_id = %event_id,
                error = %e,
                "First attempt to update webhook event failed, retrying..."
            );
            if let Err(retry_err) = self
                .record_outcome(&event_id, &processing_result, error_message.as_deref())
                .await
            {
                tracing::error!(
                    event_id = %event_id,
                    event_type = %event.type_,
                    first_error = %e,
                    retry_error = %retry_err,
                    "Failed to update webhook audit record after retry; \
                     event may appear stuck in 'processing' state"
                );
            }
        }

        result
    }

    async fn record_outcome(
        &self,
        event_id: &str,
        processing_result: &str,
        error_message: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(processing_result)
        .bind(error_message)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Dispatch to the per-event-type handler
    async fn process_event_internal(&self, event: &Event) -> BillingResult<()> {
        let event_owned = event.clone();

        match event.type_ {
            EventType::CustomerSubscriptionCreated
            | EventType::CustomerSubscriptionUpdated
            | EventType::CustomerSubscriptionDeleted => {
                self.handle_subscription_event(event_owned).await?;
            }

            EventType::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event_owned).await?;
            }

            EventType::InvoicePaid => {
                self.handle_invoice_paid(event_owned).await?;
            }
            EventType::InvoicePaymentFailed => {
                self.handle_invoice_payment_failed(event_owned).await?;
            }

            _ => {
                // Track which events we're not handling; new handlers get
                // added when one of these shows up in volume
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Received unhandled Stripe event type - no handler configured"
                );
            }
        }

        Ok(())
    }

    /// Created, updated, and deleted subscription events all resolve the
    /// same way: re-derive the whole row from the reported subscription
    async fn handle_subscription_event(&self, event: Event) -> BillingResult<()> {
        let subscription = extract_subscription(event)?;
        let user_id = self.resolve_user(&subscription).await?;

        self.sync_subscription(user_id, &subscription).await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            status = ?subscription.status,
            "Subscription event reconciled"
        );
        Ok(())
    }

    /// First successful checkout: fetch the new subscription and sync it
    async fn handle_checkout_completed(&self, event: Event) -> BillingResult<()> {
        let session = match event.data.object {
            EventObject::CheckoutSession(session) => session,
            _ => {
                return Err(BillingError::WebhookEventNotSupported(
                    "Expected CheckoutSession".to_string(),
                ))
            }
        };

        let user_id = session
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get("user_id"))
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| {
                BillingError::Internal("user_id not found in checkout metadata".to_string())
            })?;

        let Some(subscription_id) = session.subscription else {
            tracing::info!(
                user_id = %user_id,
                session_id = %session.id,
                "Checkout session completed without a subscription, nothing to sync"
            );
            return Ok(());
        };

        let parsed_sub_id = subscription_id.id().parse().map_err(|e| {
            BillingError::Internal(format!("invalid subscription id in session: {}", e))
        })?;

        // Bounded: a slow provider must not hold the delivery open. The
        // ledger keeps the event marked as errored for reprocessing.
        let timeout = self.stripe.config().api_timeout;
        let subscription = tokio::time::timeout(
            timeout,
            Subscription::retrieve(self.stripe.inner(), &parsed_sub_id, &[]),
        )
        .await
        .map_err(|_| BillingError::StripeTimeout("subscription retrieve timed out".to_string()))??;

        self.sync_subscription(user_id, &subscription).await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            "Checkout completed, subscription synced"
        );
        Ok(())
    }

    /// Payment landed: the row becomes active and the period bounds advance
    async fn handle_invoice_paid(&self, event: Event) -> BillingResult<()> {
        let invoice = extract_invoice(event)?;
        let Some(user_id) = self.user_from_invoice(&invoice).await? else {
            return Ok(());
        };

        let Some(existing) = self.subscriptions.get(user_id).await? else {
            tracing::warn!(
                user_id = %user_id,
                invoice_id = %invoice.id,
                "Invoice paid for user with no subscription row, skipping"
            );
            return Ok(());
        };

        let tier = self.tier_for_row_price(user_id, existing.stripe_price_id.as_deref()).await;
        let snapshot =
            paid_invoice_snapshot(&existing, tier, invoice.period_start, invoice.period_end);

        self.subscriptions
            .upsert_from_provider(user_id, &snapshot)
            .await?;

        tracing::info!(
            user_id = %user_id,
            invoice_id = %invoice.id,
            amount = ?invoice.amount_paid,
            "Invoice paid, subscription active"
        );
        Ok(())
    }

    /// Payment failed: past_due, but the tier is kept while the provider
    /// retries (degrade gracefully); only a later deleted/expiry event
    /// downgrades it
    async fn handle_invoice_payment_failed(&self, event: Event) -> BillingResult<()> {
        let invoice = extract_invoice(event)?;
        let Some(user_id) = self.user_from_invoice(&invoice).await? else {
            return Ok(());
        };

        let Some(existing) = self.subscriptions.get(user_id).await? else {
            tracing::warn!(
                user_id = %user_id,
                invoice_id = %invoice.id,
                "Payment failed for user with no subscription row, skipping"
            );
            return Ok(());
        };

        let tier = self.tier_for_row_price(user_id, existing.stripe_price_id.as_deref()).await;
        let snapshot = failed_invoice_snapshot(&existing, tier);

        self.subscriptions
            .upsert_from_provider(user_id, &snapshot)
            .await?;

        tracing::warn!(
            user_id = %user_id,
            invoice_id = %invoice.id,
            amount = ?invoice.amount_due,
            "Invoice payment failed, subscription past due"
        );
        Ok(())
    }

    /// Build and commit the provider snapshot for a reported subscription
    async fn sync_subscription(
        &self,
        user_id: Uuid,
        subscription: &Subscription,
    ) -> BillingResult<()> {
        let price_id = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.to_string());

        let resolution = match &price_id {
            Some(price_id) => Some(self.prices.resolve(price_id).await),
            None => None,
        };
        let resolved = require_resolved(resolution).map_err(|e| {
            tracing::warn!(
                subscription_id = %subscription.id,
                price_id = ?price_id,
                error = %e,
                "Price resolution failed, leaving event errored for replay"
            );
            e
        })?;

        let snapshot = ProviderSnapshot {
            status: SubscriptionStatus::from_stripe(subscription.status),
            tier: resolved.tier,
            plan_type: resolved.plan_type,
            current_period_start: OffsetDateTime::from_unix_timestamp(
                subscription.current_period_start,
            )
            .ok(),
            current_period_end: OffsetDateTime::from_unix_timestamp(
                subscription.current_period_end,
            )
            .ok(),
            trial_start: subscription
                .trial_start
                .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()),
            trial_end: subscription
                .trial_end
                .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()),
            cancel_at_period_end: subscription.cancel_at_period_end,
            canceled_at: subscription
                .canceled_at
                .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()),
            stripe_customer_id: Some(expandable_id(&subscription.customer)),
            stripe_subscription_id: Some(subscription.id.to_string()),
            stripe_price_id: price_id,
        };

        self.subscriptions
            .upsert_from_provider(user_id, &snapshot)
            .await?;
        Ok(())
    }

    /// Resolve the local user for a subscription event: metadata first,
    /// then the customer id mapping
    async fn resolve_user(&self, subscription: &Subscription) -> BillingResult<Uuid> {
        if let Some(user_id) = subscription
            .metadata
            .get("user_id")
            .and_then(|id| Uuid::parse_str(id).ok())
        {
            return Ok(user_id);
        }

        let customer_id = expandable_id(&subscription.customer);
        self.subscriptions
            .find_user_by_customer(&customer_id)
            .await?
            .ok_or(BillingError::NotFound(format!(
                "no user for stripe customer {}",
                customer_id
            )))
    }

    /// Resolve the user for an invoice via its customer; unknown customers
    /// are logged and skipped rather than failing the event
    async fn user_from_invoice(&self, invoice: &Invoice) -> BillingResult<Option<Uuid>> {
        let customer_id = match &invoice.customer {
            Some(stripe::Expandable::Id(id)) => id.to_string(),
            Some(stripe::Expandable::Object(c)) => c.id.to_string(),
            None => {
                tracing::warn!(invoice_id = %invoice.id, "Invoice has no customer, skipping");
                return Ok(None);
            }
        };

        let user = self.subscriptions.find_user_by_customer(&customer_id).await?;
        if user.is_none() {
            tracing::warn!(
                invoice_id = %invoice.id,
                customer_id = %customer_id,
                "Invoice customer unknown locally, skipping"
            );
        }
        Ok(user)
    }

    /// Tier for the price stored on the row, falling back to the mirror
    async fn tier_for_row_price(
        &self,
        user_id: Uuid,
        price_id: Option<&str>,
    ) -> SubscriptionTier {
        if let Some(price_id) = price_id {
            if let Ok(resolved) = self.prices.resolve(price_id).await {
                return resolved.tier;
            }
        }

        let mirrored: Option<(String,)> = sqlx::query_as("SELECT tier FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten();

        mirrored
            .and_then(|(tier,)| tier.parse().ok())
            .unwrap_or(SubscriptionTier::Pro)
    }

    /// Ledger rows that still need attention: errored outcomes and claims
    /// that never recorded one
    pub async fn list_failed_webhooks(
        &self,
        limit: i64,
        offset: i64,
    ) -> BillingResult<Vec<WebhookEventRecord>> {
        let records: Vec<WebhookEventRecord> = sqlx::query_as(
            r#"
            SELECT id, stripe_event_id, event_type, event_timestamp,
                   processing_result, processing_started_at, error_message,
                   created_at
            FROM stripe_webhook_events
            WHERE processing_result IN ('error', 'processing')
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Re-fetch an event from the provider and run it through the handlers
    /// again
    ///
    /// The delivery endpoint acks verified events with 200, so the provider
    /// stops redelivering them; this is the operator path for ledger rows
    /// that ended in 'error' after the root cause is fixed.
    pub async fn replay_webhook(
        &self,
        stripe_event_id: &str,
    ) -> BillingResult<WebhookReplayResult> {
        tracing::info!(
            stripe_event_id = %stripe_event_id,
            "Attempting to replay webhook event"
        );

        let existing: Option<(Uuid, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT id, processing_result, error_message
            FROM stripe_webhook_events
            WHERE stripe_event_id = $1
            "#,
        )
        .bind(stripe_event_id)
        .fetch_optional(&self.pool)
        .await?;

        let (record_id, previous_status, previous_error) = existing.ok_or_else(|| {
            BillingError::NotFound(format!(
                "webhook event {} not found in ledger",
                stripe_event_id
            ))
        })?;

        let event_id = stripe_event_id
            .parse::<stripe::EventId>()
            .map_err(|e| BillingError::Internal(format!("invalid event id: {}", e)))?;

        let timeout = self.stripe.config().api_timeout;
        let event = tokio::time::timeout(
            timeout,
            stripe::Event::retrieve(self.stripe.inner(), &event_id, &[]),
        )
        .await
        .map_err(|_| BillingError::StripeTimeout("event retrieve timed out".to_string()))??;

        sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = 'replaying',
                processing_started_at = NOW(),
                error_message = CONCAT('Replay initiated. Previous status: ', $2::TEXT,
                                       '. Previous error: ', COALESCE($3, 'none'))
            WHERE stripe_event_id = $1
            "#,
        )
        .bind(stripe_event_id)
        .bind(&previous_status)
        .bind(&previous_error)
        .execute(&self.pool)
        .await?;

        let process_result = self.process_event_internal(&event).await;

        let (new_status, new_error) = match &process_result {
            Ok(()) => ("success".to_string(), None),
            Err(e) => ("error".to_string(), Some(e.to_string())),
        };

        self.record_outcome(stripe_event_id, &new_status, new_error.as_deref())
            .await?;

        tracing::info!(
            stripe_event_id = %stripe_event_id,
            previous_status = %previous_status,
            new_status = %new_status,
            success = process_result.is_ok(),
            "Webhook replay completed"
        );

        Ok(WebhookReplayResult {
            record_id,
            stripe_event_id: stripe_event_id.to_string(),
            event_type: event.type_.to_string(),
            previous_status,
            previous_error,
            new_status,
            new_error,
            success: process_result.is_ok(),
        })
    }
}

/// Stored webhook ledger row
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct WebhookEventRecord {
    pub id: Uuid,
    pub stripe_event_id: String,
    pub event_type: String,
    #[serde(with = "time::serde::timestamp")]
    pub event_timestamp: OffsetDateTime,
    pub processing_result: String,
    #[serde(with = "time::serde::timestamp::option")]
    pub processing_started_at: Option<OffsetDateTime>,
    pub error_message: Option<String>,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
}

/// Result of replaying one ledger row
#[derive(Debug, Clone, serde::Serialize)]
pub struct WebhookReplayResult {
    pub record_id: Uuid,
    pub stripe_event_id: String,
    pub event_type: String,
    pub previous_status: String,
    pub previous_error: Option<String>,
    pub new_status: String,
    pub new_error: Option<String>,
    pub success: bool,
}

fn extract_subscription(event: Event) -> BillingResult<Subscription> {
    match event.data.object {
        EventObject::Subscription(subscription) => Ok(subscription),
        _ => Err(BillingError::WebhookEventNotSupported(
            "Expected Subscription".to_string(),
        )),
    }
}

fn extract_invoice(event: Event) -> BillingResult<Invoice> {
    match event.data.object {
        EventObject::Invoice(invoice) => Ok(invoice),
        _ => Err(BillingError::WebhookEventNotSupported(
            "Expected Invoice".to_string(),
        )),
    }
}

fn expandable_id(customer: &stripe::Expandable<stripe::Customer>) -> String {
    match customer {
        stripe::Expandable::Id(id) => id.to_string(),
        stripe::Expandable::Object(customer) => customer.id.to_string(),
    }
}

/// A subscription without a price line has nothing to resolve and falls
/// back to the paid monthly plan. A failed resolution propagates instead:
/// committing a guessed tier would record the event as handled, and the
/// ledger could never flag it for replay.
fn require_resolved(
    resolution: Option<BillingResult<ResolvedPrice>>,
) -> BillingResult<ResolvedPrice> {
    match resolution {
        Some(resolved) => resolved,
        None => Ok(ResolvedPrice {
            tier: SubscriptionTier::Pro,
            plan_type: PlanType::Monthly,
        }),
    }
}

/// Row state after a paid invoice: active, period bounds advanced to the
/// invoice's (carried over when the invoice omits them), cancellation
/// timestamp cleared
fn paid_invoice_snapshot(
    existing: &SubscriptionRecord,
    tier: SubscriptionTier,
    period_start: Option<i64>,
    period_end: Option<i64>,
) -> ProviderSnapshot {
    ProviderSnapshot {
        status: SubscriptionStatus::Active,
        tier,
        plan_type: existing.plan_type.parse().unwrap_or(PlanType::Monthly),
        current_period_start: period_start
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
            .or(existing.current_period_start),
        current_period_end: period_end
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
            .or(existing.current_period_end),
        trial_start: existing.trial_start,
        trial_end: existing.trial_end,
        cancel_at_period_end: existing.cancel_at_period_end,
        canceled_at: None,
        stripe_customer_id: existing.stripe_customer_id.clone(),
        stripe_subscription_id: existing.stripe_subscription_id.clone(),
        stripe_price_id: existing.stripe_price_id.clone(),
    }
}

/// Row state after a failed payment: past_due, everything else held so the
/// subscriber keeps their tier while the provider retries the charge
fn failed_invoice_snapshot(
    existing: &SubscriptionRecord,
    tier: SubscriptionTier,
) -> ProviderSnapshot {
    ProviderSnapshot {
        status: SubscriptionStatus::PastDue,
        tier,
        plan_type: existing.plan_type.parse().unwrap_or(PlanType::Monthly),
        current_period_start: existing.current_period_start,
        current_period_end: existing.current_period_end,
        trial_start: existing.trial_start,
        trial_end: existing.trial_end,
        cancel_at_period_end: existing.cancel_at_period_end,
        canceled_at: existing.canceled_at,
        stripe_customer_id: existing.stripe_customer_id.clone(),
        stripe_subscription_id: existing.stripe_subscription_id.clone(),
        stripe_price_id: existing.stripe_price_id.clone(),
    }
}

/// Hex HMAC-SHA256 over `"{timestamp}.{payload}"`, the Stripe scheme
fn compute_signature(webhook_secret: &str, timestamp: i64, payload: &str) -> Option<String> {
    let secret_key = webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(webhook_secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).ok()?;
    mac.update(signed_payload.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn existing_record() -> SubscriptionRecord {
        SubscriptionRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            status: "past_due".to_string(),
            plan_type: "annual".to_string(),
            current_period_start: OffsetDateTime::from_unix_timestamp(1_690_000_000).ok(),
            current_period_end: OffsetDateTime::from_unix_timestamp(1_692_678_400).ok(),
            trial_start: None,
            trial_end: None,
            cancel_at_period_end: false,
            canceled_at: OffsetDateTime::from_unix_timestamp(1_691_000_000).ok(),
            stripe_customer_id: Some("cus_123".to_string()),
            stripe_subscription_id: Some("sub_123".to_string()),
            stripe_price_id: Some("price_123".to_string()),
        }
    }

    #[test]
    fn unresolved_price_errors_instead_of_guessing() {
        let err = require_resolved(Some(Err(BillingError::StripeTimeout(
            "price lookup timed out".to_string(),
        ))))
        .unwrap_err();
        assert!(err.is_transient());

        // Successful resolutions pass through untouched
        let resolved = require_resolved(Some(Ok(ResolvedPrice {
            tier: SubscriptionTier::Pro,
            plan_type: PlanType::Annual,
        })))
        .unwrap();
        assert_eq!(resolved.plan_type, PlanType::Annual);
    }

    #[test]
    fn missing_price_line_defaults_to_pro_monthly() {
        let resolved = require_resolved(None).unwrap();
        assert_eq!(resolved.tier, SubscriptionTier::Pro);
        assert_eq!(resolved.plan_type, PlanType::Monthly);
    }

    #[test]
    fn paid_invoice_reactivates_and_advances_period() {
        let existing = existing_record();
        let snapshot = paid_invoice_snapshot(
            &existing,
            SubscriptionTier::Pro,
            Some(1_700_000_000),
            Some(1_702_592_000),
        );

        assert_eq!(snapshot.status, SubscriptionStatus::Active);
        assert_eq!(snapshot.plan_type, PlanType::Annual);
        assert_eq!(
            snapshot.current_period_start.map(|t| t.unix_timestamp()),
            Some(1_700_000_000)
        );
        assert_eq!(
            snapshot.current_period_end.map(|t| t.unix_timestamp()),
            Some(1_702_592_000)
        );
        assert!(snapshot.canceled_at.is_none());
    }

    #[test]
    fn paid_invoice_without_bounds_keeps_existing_period() {
        let existing = existing_record();
        let snapshot = paid_invoice_snapshot(&existing, SubscriptionTier::Pro, None, None);

        assert_eq!(snapshot.current_period_start, existing.current_period_start);
        assert_eq!(snapshot.current_period_end, existing.current_period_end);
    }

    #[test]
    fn failed_payment_holds_tier_and_period() {
        let existing = existing_record();
        let snapshot = failed_invoice_snapshot(&existing, SubscriptionTier::Pro);

        assert_eq!(snapshot.status, SubscriptionStatus::PastDue);
        assert_eq!(snapshot.tier, SubscriptionTier::Pro);
        assert_eq!(snapshot.current_period_start, existing.current_period_start);
        assert_eq!(snapshot.current_period_end, existing.current_period_end);
        assert_eq!(snapshot.canceled_at, existing.canceled_at);
    }

    #[test]
    fn signature_round_trip() {
        let secret = "whsec_test_secret";
        let payload = r#"{"id":"evt_1","type":"invoice.paid"}"#;
        let timestamp = 1_700_000_000;

        let sig = compute_signature(secret, timestamp, payload).unwrap();
        // Deterministic for identical inputs
        assert_eq!(sig, compute_signature(secret, timestamp, payload).unwrap());
        // Sensitive to any input change
        assert_ne!(sig, compute_signature(secret, timestamp + 1, payload).unwrap());
        assert_ne!(
            sig,
            compute_signature("whsec_other", timestamp, payload).unwrap()
        );
        assert_eq!(sig.len(), 64);
    }
}
