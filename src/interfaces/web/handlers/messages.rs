use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde_json::json;

use super::super::AppState;
use super::super::error::ApiResult;
use crate::core::store::types::{Message, MessageFilter};

pub async fn list_messages(
    State(state): State<AppState>,
    Query(filter): Query<MessageFilter>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(state.store.list_messages(&filter).await?))
}

pub async fn mark_read(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.mark_message_read(id).await?;
    Ok(Json(json!({ "success": true })))
}
