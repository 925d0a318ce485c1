//! Stripe webhook endpoint
//!
//! Signature failures are rejected with 400. Once the event is verified the
//! delivery is acked with 200 even if processing fails: the event ledger
//! records the failure for reprocessing, and acking stops Stripe from
//! hammering a handler that is going to fail the same way on redelivery.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use skillet_billing::BillingError;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/stripe", post(handle_stripe_webhook))
}

async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<StatusCode> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing stripe-signature header".to_string()))?;

    let event = state
        .billing
        .webhooks
        .verify_event(&body, signature)
        .map_err(|e| match e {
            BillingError::WebhookSignatureInvalid => {
                ApiError::BadRequest("invalid webhook signature".to_string())
            }
            e => ApiError::Internal(e.to_string()),
        })?;

    if let Err(e) = state.billing.webhooks.handle_event(event).await {
        tracing::error!(error = %e, "Webhook processing failed, recorded in event ledger");
    }

    Ok(StatusCode::OK)
}
