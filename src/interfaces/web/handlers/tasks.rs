use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use super::super::AppState;
use super::super::error::ApiResult;
use super::agents::AssignRequest;
use crate::core::error::CoreError;
use crate::core::lifecycle::TaskPatch;
use crate::core::store::NewTask;
use crate::core::store::types::{AgentTask, TaskPriority};

pub async fn list_tasks(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<AgentTask>>> {
    if state.store.get_agent(&agent_id).await?.is_none() {
        return Err(CoreError::not_found(format!("agent {agent_id}")).into());
    }
    Ok(Json(state.store.list_tasks_by_agent(&agent_id).await?))
}

/// Creating a task through the collection endpoint is an assignment: the
/// agent advances to `working` when it is free.
pub async fn create_task(
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

/// Status changes ride the lifecycle state machines; an illegal edge is a
/// 409.
pub async fn patch_task(
    Path((agent_id, task_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<Json<AgentTask>> {
    let task = state.lifecycle.update_task(&agent_id, &task_id, patch).await?;
    Ok(Json(task))
}
