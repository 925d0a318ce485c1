//! Entitlement and authorization endpoints
//!
//! The authorize endpoint is the fail-closed choke point: a granted
//! decision is 200, an upgrade-required denial is 402 with the quota
//! headroom, and a backend outage is 503 rather than a grant.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use skillet_billing::{AccessDecision, Capability, Denial, Feature, QuotaResource};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/{user_id}/quota/{resource}", get(check_quota))
        .route("/users/{user_id}/features/{feature}", get(check_feature))
        .route("/users/{user_id}/ai-recipes", post(consume_ai_recipe))
        .route("/users/{user_id}/authorize", post(authorize))
        .route("/users/{user_id}/trial", post(start_trial))
}

async fn check_quota(
    State(state): State<AppState>,
    Path((user_id, resource)): Path<(Uuid, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let resource: QuotaResource = resource
        .parse()
        .map_err(|e: String| ApiError::BadRequest(e))?;

    let check = state.billing.entitlements.check_quota(user_id, resource).await?;
    Ok(Json(json!({
        "resource": resource,
        "allowed": check.allowed,
        "remaining": check.remaining,
        "limit": check.limit,
    })))
}

async fn check_feature(
    State(state): State<AppState>,
    Path((user_id, feature)): Path<(Uuid, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let enabled = state
        .billing
        .entitlements
        .check_feature(user_id, &feature)
        .await?;
    Ok(Json(json!({ "feature": feature, "enabled": enabled })))
}

async fn consume_ai_recipe(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let count = state.billing.entitlements.consume_ai_recipe(user_id).await?;
    Ok(Json(json!({ "ai_recipes_generated_this_month": count })))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AuthorizeRequest {
    Quota { resource: String },
    Feature { feature: String },
}

async fn authorize(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<AuthorizeRequest>,
) -> ApiResult<Response> {
    let capability = match &request {
        AuthorizeRequest::Quota { resource } => {
            let resource: QuotaResource = resource
                .parse()
                .map_err(|e: String| ApiError::BadRequest(e))?;
            Capability::Quota(resource)
        }
        AuthorizeRequest::Feature { feature } => {
            let feature = Feature::parse(feature).ok_or_else(|| {
                ApiError::BadRequest(format!("unknown feature: {}", feature))
            })?;
            Capability::Feature(feature)
        }
    };

    let decision = state.billing.guard.authorize(user_id, &capability).await?;

    let response = match decision {
        AccessDecision::Granted => (StatusCode::OK, Json(json!({ "granted": true }))),
        AccessDecision::Denied(Denial::UpgradeRequired(info)) => (
            StatusCode::PAYMENT_REQUIRED,
            Json(json!({
                "granted": false,
                "reason": "upgrade_required",
                "limit": info.limit,
                "remaining": info.remaining,
            })),
        ),
        AccessDecision::Denied(Denial::Unavailable) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "granted": false, "reason": "unavailable" })),
        ),
    };
    Ok(response.into_response())
}

#[derive(Debug, Deserialize)]
struct StartTrialRequest {
    #[serde(default)]
    plan: Option<String>,
}

async fn start_trial(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<StartTrialRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let plan = request
        .plan
        .as_deref()
        .unwrap_or("monthly")
        .parse()
        .map_err(|e: String| ApiError::BadRequest(e))?;

    let record = state.billing.trials.create_trial(user_id, plan).await?;
    Ok(Json(json!({
        "status": record.status,
        "trial_end": record.trial_end.map(|t| t.unix_timestamp()),
    })))
}
