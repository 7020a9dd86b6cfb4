use serde::{Deserialize, Serialize};

// --- Agents ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Working,
    Blocked,
    Sleeping,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Blocked => "blocked",
            AgentStatus::Sleeping => "sleeping",
            AgentStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(AgentStatus::Idle),
            "working" => Some(AgentStatus::Working),
            "blocked" => Some(AgentStatus::Blocked),
            "sleeping" => Some(AgentStatus::Sleeping),
            "offline" => Some(AgentStatus::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentType {
    #[serde(rename = "primary")]
    Primary,
    #[serde(rename = "sub-agent")]
    SubAgent,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Primary => "primary",
            AgentType::SubAgent => "sub-agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(AgentType::Primary),
            "sub-agent" => Some(AgentType::SubAgent),
            _ => None,
        }
    }
}

/// One registered worker. `current_task_id`, when set, always references a
/// task owned by this agent that is not in a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AgentType,
    pub parent_agent_id: Option<String>,
    pub status: AgentStatus,
    pub current_task_id: Option<String>,
    pub last_heartbeat: Option<u64>,
    pub soul_md: Option<String>,
    pub skills: Vec<String>,
    pub config: serde_json::Value,
    pub created_at: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentFilter {
    pub status: Option<AgentStatus>,
    #[serde(rename = "type")]
    pub kind: Option<AgentType>,
    pub parent_agent_id: Option<String>,
}

/// Mutable agent fields settable over the API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentPatch {
    pub name: Option<String>,
    pub soul_md: Option<String>,
    pub skills: Option<Vec<String>>,
    pub config: Option<serde_json::Value>,
}

// --- Tasks ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Blocked,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "blocked" => Some(TaskStatus::Blocked),
            "completed" => Some(TaskStatus::Completed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(TaskPriority::High),
            "medium" => Some(TaskPriority::Medium),
            "low" => Some(TaskPriority::Low),
            _ => None,
        }
    }
}

/// One unit of work owned by exactly one agent. Terminal statuses are
/// monotone; the blocked fields are set iff the status is `blocked`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: String,
    pub agent_id: String,
    pub linear_issue_id: Option<String>,
    pub project_id: Option<String>,
    pub title: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub blocked_reason: Option<String>,
    pub blocked_at: Option<u64>,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

// --- Alert rules ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertTrigger {
    Blocked,
    Error,
    Completed,
    IdleTooLong,
    StaleTask,
}

impl AlertTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertTrigger::Blocked => "blocked",
            AlertTrigger::Error => "error",
            AlertTrigger::Completed => "completed",
            AlertTrigger::IdleTooLong => "idle_too_long",
            AlertTrigger::StaleTask => "stale_task",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blocked" => Some(AlertTrigger::Blocked),
            "error" => Some(AlertTrigger::Error),
            "completed" => Some(AlertTrigger::Completed),
            "idle_too_long" => Some(AlertTrigger::IdleTooLong),
            "stale_task" => Some(AlertTrigger::StaleTask),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityFilter {
    High,
    Medium,
    Low,
    All,
}

impl PriorityFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityFilter::High => "high",
            PriorityFilter::Medium => "medium",
            PriorityFilter::Low => "low",
            PriorityFilter::All => "all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(PriorityFilter::High),
            "medium" => Some(PriorityFilter::Medium),
            "low" => Some(PriorityFilter::Low),
            "all" => Some(PriorityFilter::All),
            _ => None,
        }
    }

    pub fn matches(&self, priority: TaskPriority) -> bool {
        match self {
            PriorityFilter::All => true,
            PriorityFilter::High => priority == TaskPriority::High,
            PriorityFilter::Medium => priority == TaskPriority::Medium,
            PriorityFilter::Low => priority == TaskPriority::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    Push,
    InApp,
    Both,
}

impl AlertChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertChannel::Push => "push",
            AlertChannel::InApp => "in_app",
            AlertChannel::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "push" => Some(AlertChannel::Push),
            "in_app" => Some(AlertChannel::InApp),
            "both" => Some(AlertChannel::Both),
            _ => None,
        }
    }
}

/// Declarative notification policy row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub trigger: AlertTrigger,
    pub priority_filter: PriorityFilter,
    pub delay_ms: u64,
    pub channel: AlertChannel,
    pub enabled: bool,
}

// --- Messages ---

/// Persisted notification. `content` is stored encrypted; the store hands
/// out plaintext.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub todo_id: Option<String>,
    pub session_id: Option<String>,
    pub project_id: Option<String>,
    pub read: bool,
    pub created_at: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MessageLinks {
    pub todo_id: Option<String>,
    pub session_id: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageFilter {
    pub unread: Option<bool>,
    pub limit: Option<u32>,
}

// --- Linear mirror ---

/// Cached mirror of an external-tracker issue. `agent_task_id` is the only
/// field with control-plane semantics: it links the mirror row to the task
/// the issue was auto-assigned to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearIssue {
    pub id: String,
    pub identifier: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub state_type: Option<String>,
    pub state_name: Option<String>,
    pub assignee_name: Option<String>,
    pub project_id: Option<String>,
    pub agent_task_id: Option<String>,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearProject {
    pub id: String,
    pub name: Option<String>,
    pub state: Option<String>,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearWorkflowState {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub color: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for s in [
            AgentStatus::Idle,
            AgentStatus::Working,
            AgentStatus::Blocked,
            AgentStatus::Sleeping,
            AgentStatus::Offline,
        ] {
            assert_eq!(AgentStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(AgentStatus::parse("bogus"), None);
    }

    #[test]
    fn priority_filter_matching() {
        assert!(PriorityFilter::All.matches(TaskPriority::Low));
        assert!(PriorityFilter::High.matches(TaskPriority::High));
        assert!(!PriorityFilter::High.matches(TaskPriority::Medium));
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
    }

    #[test]
    fn agent_type_serde_names() {
        let json = serde_json::to_string(&AgentType::SubAgent).unwrap();
        assert_eq!(json, "\"sub-agent\"");
    }
}
