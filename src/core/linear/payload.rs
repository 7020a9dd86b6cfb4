use serde::Deserialize;

use crate::core::store::LinearIssuePatch;
use crate::core::store::types::TaskPriority;

/// Outer webhook frame. `data` stays untyped until the type tag routes it to
/// a normaliser; downstream code never sees raw maps.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IssuePayload {
    pub id: String,
    pub identifier: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    #[serde(rename = "projectId")]
    pub project_id: Option<String>,
    pub state: Option<StatePayload>,
    pub assignee: Option<AssigneePayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatePayload {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AssigneePayload {
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub name: Option<String>,
}

impl AssigneePayload {
    pub fn best_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .or(self.name.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProjectPayload {
    pub id: String,
    pub name: Option<String>,
    pub state: Option<String>,
}

impl IssuePayload {
    pub fn to_patch(&self) -> LinearIssuePatch {
        LinearIssuePatch {
            identifier: self.identifier.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            priority: self.priority,
            state_type: self.state.as_ref().and_then(|s| s.kind.clone()),
            state_name: self.state.as_ref().and_then(|s| s.name.clone()),
            assignee_name: self
                .assignee
                .as_ref()
                .and_then(|a| a.best_name())
                .map(|s| s.to_string()),
            project_id: self.project_id.clone(),
        }
    }
}

pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Does the mirrored state mean the issue is actively being worked?
pub fn state_is_started(state_type: Option<&str>, state_name: Option<&str>) -> bool {
    if let Some(kind) = state_type {
        if matches!(normalize(kind).as_str(), "started" | "in_progress") {
            return true;
        }
    }
    if let Some(name) = state_name {
        if matches!(normalize(name).as_str(), "started" | "in progress" | "in_progress") {
            return true;
        }
    }
    false
}

/// Linear priorities map down to the three-level task priority.
pub fn priority_from_linear(priority: Option<i64>) -> TaskPriority {
    match priority {
        Some(p) if p >= 3 => TaskPriority::High,
        Some(2) => TaskPriority::Medium,
        _ => TaskPriority::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_and_issue_parse_from_webhook_json() {
        let body = r#"{
            "type": "Issue",
            "action": "create",
            "data": {
                "id": "I1",
                "title": "fix login",
                "priority": 3,
                "projectId": "P1",
                "state": {"id": "S1", "type": "started", "name": "In Progress"},
                "assignee": {"displayName": "Agent Match"}
            }
        }"#;
        let envelope: WebhookEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.kind, "Issue");
        assert_eq!(envelope.action, "create");

        let issue: IssuePayload = serde_json::from_value(envelope.data).unwrap();
        assert_eq!(issue.id, "I1");
        let patch = issue.to_patch();
        assert_eq!(patch.state_type.as_deref(), Some("started"));
        assert_eq!(patch.assignee_name.as_deref(), Some("Agent Match"));
        assert_eq!(patch.project_id.as_deref(), Some("P1"));
    }

    #[test]
    fn started_state_detection_is_normalised() {
        assert!(state_is_started(Some("started"), None));
        assert!(state_is_started(Some(" IN_PROGRESS "), None));
        assert!(state_is_started(None, Some("In Progress")));
        assert!(state_is_started(None, Some("started")));
        assert!(!state_is_started(Some("backlog"), Some("Todo")));
        assert!(!state_is_started(None, None));
    }

    #[test]
    fn priority_mapping_matches_the_tracker_scale() {
        assert_eq!(priority_from_linear(Some(4)), TaskPriority::High);
        assert_eq!(priority_from_linear(Some(3)), TaskPriority::High);
        assert_eq!(priority_from_linear(Some(2)), TaskPriority::Medium);
        assert_eq!(priority_from_linear(Some(1)), TaskPriority::Low);
        assert_eq!(priority_from_linear(Some(0)), TaskPriority::Low);
        assert_eq!(priority_from_linear(None), TaskPriority::Low);
    }

    #[test]
    fn assignee_falls_back_from_display_name_to_name() {
        let assignee = AssigneePayload {
            display_name: None,
            name: Some("worker".into()),
        };
        assert_eq!(assignee.best_name(), Some("worker"));
        let blank = AssigneePayload {
            display_name: Some("   ".into()),
            name: None,
        };
        assert_eq!(blank.best_name(), None);
    }
}
