pub mod payload;
pub mod signature;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::clock::Clock;
use crate::core::error::{CoreError, CoreResult};
use crate::core::lifecycle::LifecycleManager;
use crate::core::store::types::LinearWorkflowState;
use crate::core::store::{LinearProjectPatch, NewTask, Store};
use payload::{IssuePayload, ProjectPayload, WebhookEnvelope};

/// What one webhook delivery did, echoed back to the sender.
#[derive(Debug, Serialize)]
pub struct IngestReport {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    pub handled: bool,
    pub auto_assigned_task: Option<String>,
}

/// Signature-verified ingest of tracker webhooks. Verification happens on
/// the raw body before anything is parsed; a bad or missing signature is a
/// hard `Unauthorized` with no further detail.
pub struct LinearIngest {
    store: Arc<Store>,
    lifecycle: Arc<LifecycleManager>,
    clock: Clock,
    secret: Option<String>,
}

impl LinearIngest {
    pub fn new(
        store: Arc<Store>,
        lifecycle: Arc<LifecycleManager>,
        clock: Clock,
        secret: Option<String>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            clock,
            secret,
        }
    }

    pub async fn handle(&self, body: &[u8], signature: Option<&str>) -> CoreResult<IngestReport> {
        let Some(secret) = self.secret.as_deref() else {
            warn!("webhook delivery rejected: no LINEAR_WEBHOOK_SECRET configured");
            return Err(CoreError::Unauthorized);
        };
        let Some(signature) = signature else {
            return Err(CoreError::Unauthorized);
        };
        if !signature::verify(secret, body, signature) {
            return Err(CoreError::Unauthorized);
        }

        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|e| CoreError::Validation(format!("malformed webhook payload: {e}")))?;

        match envelope.kind.as_str() {
            "Issue" => self.handle_issue(envelope).await,
            "Project" => self.handle_project(envelope).await,
            // Accepted so the tracker does not retry, mirrored nowhere.
            other => {
                debug!("webhook type {other} accepted as no-op");
                Ok(IngestReport {
                    kind: envelope.kind,
                    action: envelope.action,
                    handled: false,
                    auto_assigned_task: None,
                })
            }
        }
    }

    async fn handle_issue(&self, envelope: WebhookEnvelope) -> CoreResult<IngestReport> {
        let issue: IssuePayload = serde_json::from_value(envelope.data)
            .map_err(|e| CoreError::Validation(format!("malformed issue payload: {e}")))?;
        if issue.id.trim().is_empty() {
            return Err(CoreError::Validation("issue payload is missing an id".into()));
        }

        if envelope.action == "remove" {
            self.store.delete_linear_issue(&issue.id).await?;
            info!("Linear issue {} removed from the mirror", issue.id);
            return Ok(IngestReport {
                kind: envelope.kind,
                action: envelope.action,
                handled: true,
                auto_assigned_task: None,
            });
        }

        if let Some(state) = &issue.state {
            if let Some(state_id) = state.id.clone() {
                self.store
                    .upsert_workflow_state(&LinearWorkflowState {
                        id: state_id,
                        name: state.name.clone(),
                        kind: state.kind.clone(),
                        color: state.color.clone(),
                    })
                    .await?;
            }
        }

        self.store
            .upsert_linear_issue(&issue.id, issue.to_patch(), self.clock.now())
            .await?;
        let auto_assigned_task = self.maybe_auto_assign(&issue.id).await?;

        Ok(IngestReport {
            kind: envelope.kind,
            action: envelope.action,
            handled: true,
            auto_assigned_task,
        })
    }

    async fn handle_project(&self, envelope: WebhookEnvelope) -> CoreResult<IngestReport> {
        let project: ProjectPayload = serde_json::from_value(envelope.data)
            .map_err(|e| CoreError::Validation(format!("malformed project payload: {e}")))?;
        if project.id.trim().is_empty() {
            return Err(CoreError::Validation("project payload is missing an id".into()));
        }

        if envelope.action == "remove" {
            self.store.delete_linear_project(&project.id).await?;
        } else {
            self.store
                .upsert_linear_project(
                    &project.id,
                    LinearProjectPatch {
                        name: project.name.clone(),
                        state: project.state.clone(),
                    },
                    self.clock.now(),
                )
                .await?;
        }

        Ok(IngestReport {
            kind: envelope.kind,
            action: envelope.action,
            handled: true,
            auto_assigned_task: None,
        })
    }

    /// Hand a freshly-started, matching issue to the lifecycle manager. A
    /// mirror row that is already linked short-circuits, which makes webhook
    /// replays assignment-idempotent.
    async fn maybe_auto_assign(&self, issue_id: &str) -> CoreResult<Option<String>> {
        let Some(issue) = self.store.get_linear_issue(issue_id).await? else {
            return Ok(None);
        };
        if issue.agent_task_id.is_some() {
            return Ok(None);
        }
        if !payload::state_is_started(issue.state_type.as_deref(), issue.state_name.as_deref()) {
            return Ok(None);
        }
        let Some(assignee) = issue.assignee_name.as_deref() else {
            return Ok(None);
        };
        let Some(agent) = self.store.find_agent_by_normalized_name(assignee).await? else {
            debug!("no agent matches Linear assignee {assignee:?}; issue {issue_id} left alone");
            return Ok(None);
        };

        let task_id = format!("linear_{issue_id}");
        let title = issue
            .title
            .clone()
            .or(issue.identifier.clone())
            .unwrap_or_else(|| issue_id.to_string());
        let new = NewTask {
            id: task_id.clone(),
            title,
            priority: payload::priority_from_linear(issue.priority),
            linear_issue_id: Some(issue_id.to_string()),
            project_id: issue.project_id.clone(),
        };

        match self.lifecycle.assign_task(&agent.id, new).await {
            Ok(task) => {
                info!(
                    "Linear issue {issue_id} auto-assigned to agent [{}] as task {}",
                    agent.id, task.id
                );
                Ok(Some(task.id))
            }
            Err(CoreError::Conflict(msg)) => {
                // Replay or a busy/offline agent; the mirror stays unlinked.
                debug!("auto-assign of issue {issue_id} skipped: {msg}");
                Ok(None)
            }
            Err(e) => {
                warn!("auto-assign of issue {issue_id} to agent [{}] failed: {e}", agent.id);
                Ok(None)
            }
        }
    }
}
