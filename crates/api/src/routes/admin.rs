//! Operator endpoints for the webhook ledger
//!
//! The delivery endpoint acks verified events, so the provider stops
//! redelivering them; these routes are how an operator finds ledger rows
//! that ended in 'error' and pushes them back through the handlers.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use skillet_billing::{WebhookEventRecord, WebhookReplayResult};

use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/webhooks/failed", get(list_failed_webhooks))
        .route("/admin/webhooks/{event_id}/replay", post(replay_webhook))
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_page_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_page_limit() -> i64 {
    50
}

async fn list_failed_webhooks(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<WebhookEventRecord>>> {
    let records = state
        .billing
        .webhooks
        .list_failed_webhooks(page.limit, page.offset)
        .await?;
    Ok(Json(records))
}

async fn replay_webhook(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> ApiResult<Json<WebhookReplayResult>> {
    let result = state.billing.webhooks.replay_webhook(&event_id).await?;
    Ok(Json(result))
}
