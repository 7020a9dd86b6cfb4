use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;

use super::super::AppState;
use super::super::error::ApiResult;
use crate::core::error::CoreError;
use crate::core::lifecycle::{BlockContext, BlockSource};
use crate::core::store::types::{Agent, AgentFilter, AgentPatch, AgentTask, TaskPriority};
use crate::core::store::{NewAgent, NewTask};

pub async fn register_agent(
    State(state): State<AppState>,
    Json(payload): Json<NewAgent>,
) -> ApiResult<(StatusCode, Json<Agent>)> {
    if payload.name.trim().is_empty() {
        return Err(CoreError::Validation("name must not be empty".into()).into());
    }
    let agent = state.lifecycle.register_agent(payload).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

pub async fn list_agents(
    State(state): State<AppState>,
    Query(filter): Query<AgentFilter>,
) -> ApiResult<Json<Vec<Agent>>> {
    Ok(Json(state.store.list_agents(&filter).await?))
}

pub async fn get_agent(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Agent>> {
    let agent = state
        .store
        .get_agent(&agent_id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("agent {agent_id}")))?;
    Ok(Json(agent))
}

pub async fn patch_agent(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    Json(patch): Json<AgentPatch>,
) -> ApiResult<Json<Agent>> {
    Ok(Json(state.store.update_agent(&agent_id, &patch).await?))
}

pub async fn delete_agent(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.lifecycle.remove_agent(&agent_id).await? {
        return Err(CoreError::not_found(format!("agent {agent_id}")).into());
    }
    Ok(Json(json!({ "success": true })))
}

pub async fn heartbeat(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state.lifecycle.refresh_heartbeat(&agent_id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct BlockRequest {
    #[serde(rename = "taskId")]
    task_id: String,
    source: Option<String>,
    reason: Option<String>,
}

pub async fn report_block(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<BlockRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.store.get_agent(&agent_id).await?.is_none() {
        return Err(CoreError::not_found(format!("agent {agent_id}")).into());
    }

    let source = match body.source.as_deref() {
        None => BlockSource::Explicit,
        Some(raw) => BlockSource::parse(raw).ok_or_else(|| {
            CoreError::Validation(format!("unknown block source: {raw}"))
        })?,
    };
    state
        .lifecycle
        .detect_blocked(
            &agent_id,
            BlockContext {
                source,
                reason: body.reason.unwrap_or_else(|| "no reason given".to_string()),
                task_id: body.task_id,
            },
        )
        .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct TaskRef {
    #[serde(rename = "taskId")]
    task_id: String,
}

pub async fn report_error(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<TaskRef>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.store.get_agent(&agent_id).await?.is_none() {
        return Err(CoreError::not_found(format!("agent {agent_id}")).into());
    }
    let triggered = state.lifecycle.record_error(&agent_id, &body.task_id).await?;
    Ok(Json(json!({ "triggered": triggered })))
}

pub async fn complete(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<TaskRef>,
) -> ApiResult<Json<AgentTask>> {
    let task = state.lifecycle.complete_task(&agent_id, &body.task_id).await?;
    Ok(Json(task))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    #[serde(rename = "taskId")]
    pub task_id: Option<String>,
    pub title: String,
    pub priority: Option<TaskPriority>,
    #[serde(rename = "linearIssueId")]
    pub linear_issue_id: Option<String>,
    #[serde(rename = "projectId")]
    pub project_id: Option<String>,
}

pub async fn assign(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<AssignRequest>,
) -> ApiResult<(StatusCode, Json<AgentTask>)> {
    if body.title.trim().is_empty() {
        return Err(CoreError::Validation("title must not be empty".into()).into());
    }
    let new = NewTask {
        id: body
            .task_id
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| format!("task_{}", uuid::Uuid::new_v4())),
        title: body.title,
        priority: body.priority.unwrap_or(TaskPriority::Medium),
        linear_issue_id: body.linear_issue_id,
        project_id: body.project_id,
    };
    let task = state.lifecycle.assign_task(&agent_id, new).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[derive(Deserialize)]
pub struct ActionRequest {
    action: String,
    reason: Option<String>,
}

pub async fn actions(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<ActionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.store.get_agent(&agent_id).await?.is_none() {
        return Err(CoreError::not_found(format!("agent {agent_id}")).into());
    }

    match body.action.as_str() {
        "sleep" => {
            let reason = body.reason.unwrap_or_else(|| "manual".to_string());
            state.lifecycle.trigger_sleep(&agent_id, &reason).await?;
            Ok(Json(json!({ "success": true, "action": "sleep" })))
        }
        "wake" => {
            state.lifecycle.trigger_wake(&agent_id).await?;
            Ok(Json(json!({ "success": true, "action": "wake" })))
        }
        "stop" => {
            let cancelled = state.lifecycle.stop_agent(&agent_id).await?;
            Ok(Json(json!({
                "success": true,
                "action": "stop",
                "cancelled_tasks": cancelled,
            })))
        }
        "unblock" => {
            let (task, cancelled_alerts) = state.lifecycle.unblock(&agent_id).await?;
            Ok(Json(json!({
                "success": true,
                "action": "unblock",
                "task": task,
                "cancelled_alerts": cancelled_alerts,
            })))
        }
        "restart" => {
            state.lifecycle.restart_agent(&agent_id).await?;
            Ok(Json(json!({ "success": true, "action": "restart" })))
        }
        other => Err(CoreError::Validation(format!("unknown action: {other}")).into()),
    }
}
