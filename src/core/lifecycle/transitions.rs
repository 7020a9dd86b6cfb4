use crate::core::store::types::{AgentStatus, TaskStatus};

/// Agent-status edges reachable through normal lifecycle operations. The
/// admin `stop` and `restart` operations force `offline`/`idle` from any
/// state and bypass this table.
pub fn agent_transition_allowed(from: AgentStatus, to: AgentStatus) -> bool {
    use AgentStatus::*;
    matches!(
        (from, to),
        // assignment
        (Idle, Working) | (Blocked, Working) | (Sleeping, Working)
        // block detection
        | (Working, Blocked)
        // completion; settling a blocked task frees its agent
        | (Working, Idle) | (Working, Sleeping) | (Blocked, Idle)
        // sleep from idle or blocked (working sleeps via completion), wake to idle
        | (Idle, Sleeping) | (Blocked, Sleeping)
        | (Sleeping, Idle)
    )
}

/// Task-status edges. Terminal statuses have no outgoing edges.
pub fn task_transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, InProgress)
            | (Pending, Blocked)
            | (Pending, Completed)
            | (Pending, Cancelled)
            | (InProgress, Blocked)
            | (InProgress, Completed)
            | (InProgress, Cancelled)
            | (Blocked, InProgress)
            | (Blocked, Completed)
            | (Blocked, Cancelled)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::types::{AgentStatus::*, TaskStatus};

    #[test]
    fn assignment_edges() {
        assert!(agent_transition_allowed(Idle, Working));
        assert!(agent_transition_allowed(Blocked, Working));
        assert!(agent_transition_allowed(Sleeping, Working));
        assert!(!agent_transition_allowed(Offline, Working));
    }

    #[test]
    fn only_working_agents_can_be_blocked() {
        assert!(agent_transition_allowed(Working, Blocked));
        assert!(!agent_transition_allowed(Idle, Blocked));
        assert!(!agent_transition_allowed(Sleeping, Blocked));
        assert!(!agent_transition_allowed(Offline, Blocked));
    }

    #[test]
    fn settling_a_blocked_task_frees_the_agent() {
        assert!(agent_transition_allowed(Blocked, Idle));
        assert!(agent_transition_allowed(Blocked, Working));
        assert!(agent_transition_allowed(Blocked, Sleeping));
    }

    #[test]
    fn terminal_task_statuses_have_no_exits() {
        for to in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
            TaskStatus::Completed,
            TaskStatus::Cancelled,
        ] {
            assert!(!task_transition_allowed(TaskStatus::Completed, to));
            assert!(!task_transition_allowed(TaskStatus::Cancelled, to));
        }
    }

    #[test]
    fn blocked_cycles_with_in_progress() {
        assert!(task_transition_allowed(TaskStatus::InProgress, TaskStatus::Blocked));
        assert!(task_transition_allowed(TaskStatus::Blocked, TaskStatus::InProgress));
        assert!(!task_transition_allowed(TaskStatus::Completed, TaskStatus::Blocked));
    }

    #[test]
    fn no_return_to_pending() {
        assert!(!task_transition_allowed(TaskStatus::InProgress, TaskStatus::Pending));
        assert!(!task_transition_allowed(TaskStatus::Blocked, TaskStatus::Pending));
    }
}
