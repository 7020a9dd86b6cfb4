use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;

use super::super::AppState;
use super::super::error::ApiResult;
use crate::core::error::CoreError;
use crate::core::store::types::{AlertChannel, AlertRule};

pub async fn list_rules(State(state): State<AppState>) -> ApiResult<Json<Vec<AlertRule>>> {
    Ok(Json(state.store.list_alert_rules().await?))
}

pub async fn create_rule(
    State(state): State<AppState>,
    Json(rule): Json<AlertRule>,
) -> ApiResult<(StatusCode, Json<AlertRule>)> {
    if rule.id.trim().is_empty() {
        return Err(CoreError::Validation("rule id must not be empty".into()).into());
    }
    let rule = state.store.create_alert_rule(&rule).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

#[derive(Deserialize)]
pub struct RulePatch {
    pub delay_ms: Option<u64>,
    pub channel: Option<AlertChannel>,
    pub enabled: Option<bool>,
}

pub async fn patch_rule(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(patch): Json<RulePatch>,
) -> ApiResult<Json<AlertRule>> {
    let rule = state
        .store
        .update_alert_rule(&id, patch.delay_ms, patch.channel, patch.enabled)
        .await?;
    Ok(Json(rule))
}

pub async fn delete_rule(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.store.delete_alert_rule(&id).await? {
        return Err(CoreError::not_found(format!("alert rule {id}")).into());
    }
    Ok(Json(json!({ "success": true })))
}
