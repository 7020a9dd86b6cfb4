use rusqlite::params;

use super::types::*;
use super::{Store, TASK_COLS, task_from_row};
use crate::core::error::{CoreError, CoreResult};
use crate::core::lifecycle::agent_transition_allowed;

/// Assignment payload for a new task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub title: String,
    pub priority: TaskPriority,
    pub linear_issue_id: Option<String>,
    pub project_id: Option<String>,
}

fn load_task(
    tx: &rusqlite::Transaction<'_>,
    task_id: &str,
) -> CoreResult<Option<AgentTask>> {
    let mut stmt = tx.prepare(&format!("SELECT {TASK_COLS} FROM agent_tasks WHERE id = ?1"))?;
    let mut rows = stmt.query_map(params![task_id], task_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

fn load_agent_state(
    tx: &rusqlite::Transaction<'_>,
    agent_id: &str,
) -> CoreResult<Option<(AgentStatus, Option<String>)>> {
    let row = tx.query_row(
        "SELECT status, current_task_id FROM agents WHERE id = ?1",
        params![agent_id],
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?)),
    );
    match row {
        Ok((status_raw, current)) => {
            let status = super::parse_col(0, &status_raw, AgentStatus::parse)?;
            Ok(Some((status, current)))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn first_pending(
    tx: &rusqlite::Transaction<'_>,
    agent_id: &str,
) -> CoreResult<Option<String>> {
    let mut stmt = tx.prepare(
        "SELECT id FROM agent_tasks WHERE agent_id = ?1 AND status = 'pending' \
         ORDER BY created_at LIMIT 1",
    )?;
    let mut rows = stmt.query_map(params![agent_id], |r| r.get::<_, String>(0))?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

impl Store {
    pub async fn get_task(&self, id: &str) -> CoreResult<Option<AgentTask>> {
        super::retry_read(|| self.get_task_once(id)).await
    }

    async fn get_task_once(&self, id: &str) -> CoreResult<Option<AgentTask>> {
        let conn = self.conn().lock().await;
        let mut stmt =
            conn.prepare(&format!("SELECT {TASK_COLS} FROM agent_tasks WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], task_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn list_tasks_by_agent(&self, agent_id: &str) -> CoreResult<Vec<AgentTask>> {
        let conn = self.conn().lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLS} FROM agent_tasks WHERE agent_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![agent_id], task_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub async fn pending_tasks(&self, agent_id: &str) -> CoreResult<Vec<AgentTask>> {
        let conn = self.conn().lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLS} FROM agent_tasks WHERE agent_id = ?1 AND status = 'pending' \
             ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![agent_id], task_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub async fn delete_task(&self, id: &str) -> CoreResult<bool> {
        let conn = self.conn().lock().await;
        let removed = conn.execute("DELETE FROM agent_tasks WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    pub async fn update_task_meta(
        &self,
        id: &str,
        title: Option<&str>,
        priority: Option<TaskPriority>,
        now: u64,
    ) -> CoreResult<AgentTask> {
        let conn = self.conn().lock().await;
        let updated = conn.execute(
            "UPDATE agent_tasks SET
                title = COALESCE(?2, title),
                priority = COALESCE(?3, priority),
                updated_at = ?4
             WHERE id = ?1",
            params![id, title, priority.map(|p| p.as_str()), now as i64],
        )?;
        if updated == 0 {
            return Err(CoreError::not_found(format!("task {id}")));
        }
        let task = conn.query_row(
            &format!("SELECT {TASK_COLS} FROM agent_tasks WHERE id = ?1"),
            params![id],
            task_from_row,
        )?;
        Ok(task)
    }

    /// Create a pending task for `agent_id`, advancing the agent to `working`
    /// when it has no live current task. One transaction.
    pub async fn apply_assignment(
        &self,
        agent_id: &str,
        new: NewTask,
        now: u64,
    ) -> CoreResult<AgentTask> {
        let agent_id = agent_id.to_string();
        self.with_tx(move |tx| {
            let Some((status, current)) = load_agent_state(tx, &agent_id)? else {
                return Err(CoreError::not_found(format!("agent {agent_id}")));
            };
            if status == AgentStatus::Offline {
                return Err(CoreError::conflict(format!(
                    "agent {agent_id} is offline and cannot take work"
                )));
            }

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO agent_tasks \
                 (id, agent_id, linear_issue_id, project_id, title, status, priority, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?7)",
                params![
                    new.id,
                    agent_id,
                    new.linear_issue_id,
                    new.project_id,
                    new.title,
                    new.priority.as_str(),
                    now as i64
                ],
            )?;
            if inserted == 0 {
                return Err(CoreError::conflict(format!("task {} already exists", new.id)));
            }

            let takes_current = current.is_none()
                || matches!(
                    status,
                    AgentStatus::Idle | AgentStatus::Blocked | AgentStatus::Sleeping
                );
            if takes_current {
                tx.execute(
                    "UPDATE agents SET status = 'working', current_task_id = ?2, last_heartbeat = ?3 \
                     WHERE id = ?1",
                    params![agent_id, new.id, now as i64],
                )?;
            }

            load_task(tx, &new.id)?
                .ok_or_else(|| CoreError::Fatal(format!("task {} vanished mid-insert", new.id)))
        })
        .await
    }

    /// Move the task to `blocked` and its agent with it. Returns `None`
    /// (without writing) when the task is missing, owned by someone else,
    /// already blocked, or terminal, or when the agent has no legal edge
    /// into `blocked` — the caller logs and skips. Task and agent move
    /// together or not at all.
    pub async fn apply_block(
        &self,
        agent_id: &str,
        task_id: &str,
        reason: &str,
        now: u64,
    ) -> CoreResult<Option<AgentTask>> {
        let agent_id = agent_id.to_string();
        let task_id = task_id.to_string();
        let reason = reason.to_string();
        self.with_tx(move |tx| {
            let task = match load_task(tx, &task_id)? {
                Some(t) if t.agent_id == agent_id => t,
                _ => return Ok(None),
            };
            if task.status.is_terminal() || task.status == TaskStatus::Blocked {
                return Ok(None);
            }

            let Some((status, _)) = load_agent_state(tx, &agent_id)? else {
                return Ok(None);
            };
            if !agent_transition_allowed(status, AgentStatus::Blocked) {
                return Ok(None);
            }

            tx.execute(
                "UPDATE agent_tasks SET status = 'blocked', blocked_reason = ?2, blocked_at = ?3, \
                 updated_at = ?3 WHERE id = ?1",
                params![task_id, reason, now as i64],
            )?;
            tx.execute(
                "UPDATE agents SET status = 'blocked', current_task_id = ?2 WHERE id = ?1",
                params![agent_id, task_id],
            )?;

            load_task(tx, &task_id)
        })
        .await
    }

    /// First entry into `in_progress`: stamps `started_at` once and clears any
    /// blocked markers. Unblocks the owning agent when this was its current
    /// task.
    pub async fn start_task(
        &self,
        agent_id: &str,
        task_id: &str,
        now: u64,
    ) -> CoreResult<AgentTask> {
        let agent_id = agent_id.to_string();
        let task_id = task_id.to_string();
        self.with_tx(move |tx| {
            let task = load_task(tx, &task_id)?
                .filter(|t| t.agent_id == agent_id)
                .ok_or_else(|| CoreError::not_found(format!("task {task_id}")))?;
            if task.status.is_terminal() {
                return Err(CoreError::conflict(format!(
                    "task {task_id} is {} and cannot restart",
                    task.status.as_str()
                )));
            }
            if task.status == TaskStatus::InProgress {
                return Ok(task);
            }

            tx.execute(
                "UPDATE agent_tasks SET status = 'in_progress', \
                 started_at = COALESCE(started_at, ?2), \
                 blocked_reason = NULL, blocked_at = NULL, updated_at = ?2 \
                 WHERE id = ?1",
                params![task_id, now as i64],
            )?;
            tx.execute(
                "UPDATE agents SET status = 'working' \
                 WHERE id = ?1 AND current_task_id = ?2 AND status IN ('blocked', 'idle', 'sleeping')",
                params![agent_id, task_id],
            )?;

            load_task(tx, &task_id)?
                .ok_or_else(|| CoreError::Fatal(format!("task {task_id} vanished mid-update")))
        })
        .await
    }

    /// Complete the task, then either advance the agent to its oldest pending
    /// task or park it in `park`. The agent row only moves when the finished
    /// task was its current one (or it had none) and the status machine has
    /// an edge for the move; otherwise the agent keeps whatever it was doing.
    /// Returns the completed row and the agent's status after the
    /// transaction.
    pub async fn finish_task(
        &self,
        agent_id: &str,
        task_id: &str,
        now: u64,
        park: AgentStatus,
    ) -> CoreResult<(AgentTask, AgentStatus)> {
        let agent_id = agent_id.to_string();
        let task_id = task_id.to_string();
        self.with_tx(move |tx| {
            let task = load_task(tx, &task_id)?
                .filter(|t| t.agent_id == agent_id)
                .ok_or_else(|| CoreError::not_found(format!("task {task_id}")))?;
            if task.status.is_terminal() {
                return Err(CoreError::conflict(format!(
                    "task {task_id} is already {}",
                    task.status.as_str()
                )));
            }
            let Some((status, current)) = load_agent_state(tx, &agent_id)? else {
                return Err(CoreError::not_found(format!("agent {agent_id}")));
            };

            tx.execute(
                "UPDATE agent_tasks SET status = 'completed', completed_at = ?2, \
                 blocked_reason = NULL, blocked_at = NULL, updated_at = ?2 \
                 WHERE id = ?1",
                params![task_id, now as i64],
            )?;

            let owns_agent = current.is_none() || current.as_deref() == Some(task_id.as_str());
            // Settling a task never wakes a sleeping agent; it parks where it is.
            let park = if status == AgentStatus::Sleeping {
                AgentStatus::Sleeping
            } else {
                park
            };
            let mut status_after = status;
            if owns_agent {
                match first_pending(tx, &agent_id)? {
                    Some(next_id)
                        if status != AgentStatus::Sleeping
                            && (status == AgentStatus::Working
                                || agent_transition_allowed(status, AgentStatus::Working)) =>
                    {
                        tx.execute(
                            "UPDATE agents SET status = 'working', current_task_id = ?2 \
                             WHERE id = ?1",
                            params![agent_id, next_id],
                        )?;
                        status_after = AgentStatus::Working;
                    }
                    None if status == park || agent_transition_allowed(status, park) => {
                        tx.execute(
                            "UPDATE agents SET status = ?2, current_task_id = NULL WHERE id = ?1",
                            params![agent_id, park.as_str()],
                        )?;
                        status_after = park;
                    }
                    _ => {
                        // No legal edge (offline agent); just drop the stale
                        // pointer so it cannot reference a terminal task.
                        tx.execute(
                            "UPDATE agents SET current_task_id = NULL WHERE id = ?1",
                            params![agent_id],
                        )?;
                    }
                }
            }

            let task = load_task(tx, &task_id)?
                .ok_or_else(|| CoreError::Fatal(format!("task {task_id} vanished mid-update")))?;
            Ok((task, status_after))
        })
        .await
    }

    /// Cancel one task and restore the agent to a consistent state.
    pub async fn cancel_task(
        &self,
        agent_id: &str,
        task_id: &str,
        now: u64,
    ) -> CoreResult<(AgentTask, bool)> {
        let agent_id = agent_id.to_string();
        let task_id = task_id.to_string();
        self.with_tx(move |tx| {
            let task = load_task(tx, &task_id)?
                .filter(|t| t.agent_id == agent_id)
                .ok_or_else(|| CoreError::not_found(format!("task {task_id}")))?;
            if task.status.is_terminal() {
                return Err(CoreError::conflict(format!(
                    "task {task_id} is already {}",
                    task.status.as_str()
                )));
            }

            tx.execute(
                "UPDATE agent_tasks SET status = 'cancelled', completed_at = ?2, \
                 blocked_reason = NULL, blocked_at = NULL, updated_at = ?2 \
                 WHERE id = ?1",
                params![task_id, now as i64],
            )?;

            let Some((status, current)) = load_agent_state(tx, &agent_id)? else {
                return Err(CoreError::not_found(format!("agent {agent_id}")));
            };
            let next = first_pending(tx, &agent_id)?;
            let had_pending = next.is_some();
            if current.as_deref() == Some(task_id.as_str()) {
                match next {
                    // A sleeping agent keeps sleeping; only its pointer clears.
                    Some(next_id)
                        if status != AgentStatus::Sleeping
                            && (status == AgentStatus::Working
                                || agent_transition_allowed(status, AgentStatus::Working)) =>
                    {
                        tx.execute(
                            "UPDATE agents SET status = 'working', current_task_id = ?2 \
                             WHERE id = ?1",
                            params![agent_id, next_id],
                        )?;
                    }
                    None if status != AgentStatus::Sleeping
                        && (status == AgentStatus::Idle
                            || agent_transition_allowed(status, AgentStatus::Idle)) =>
                    {
                        tx.execute(
                            "UPDATE agents SET status = 'idle', current_task_id = NULL \
                             WHERE id = ?1",
                            params![agent_id],
                        )?;
                    }
                    _ => {
                        tx.execute(
                            "UPDATE agents SET current_task_id = NULL WHERE id = ?1",
                            params![agent_id],
                        )?;
                    }
                }
            }

            let task = load_task(tx, &task_id)?
                .ok_or_else(|| CoreError::Fatal(format!("task {task_id} vanished mid-update")))?;
            Ok((task, had_pending))
        })
        .await
    }

    /// Admin stop: cancel every live task and park the agent offline.
    /// Returns the ids of the tasks that were cancelled.
    pub async fn apply_stop(&self, agent_id: &str, now: u64) -> CoreResult<Vec<String>> {
        let agent_id = agent_id.to_string();
        self.with_tx(move |tx| {
            let updated = tx.execute(
                "UPDATE agents SET status = 'offline', current_task_id = NULL WHERE id = ?1",
                params![agent_id],
            )?;
            if updated == 0 {
                return Err(CoreError::not_found(format!("agent {agent_id}")));
            }

            let mut stmt = tx.prepare(
                "SELECT id FROM agent_tasks WHERE agent_id = ?1 \
                 AND status IN ('pending', 'in_progress', 'blocked')",
            )?;
            let rows = stmt.query_map(params![agent_id], |r| r.get::<_, String>(0))?;
            let mut cancelled = Vec::new();
            for row in rows {
                cancelled.push(row?);
            }
            drop(stmt);

            tx.execute(
                "UPDATE agent_tasks SET status = 'cancelled', completed_at = ?2, \
                 blocked_reason = NULL, blocked_at = NULL, updated_at = ?2 \
                 WHERE agent_id = ?1 AND status IN ('pending', 'in_progress', 'blocked')",
                params![agent_id, now as i64],
            )?;

            Ok(cancelled)
        })
        .await
    }
}
