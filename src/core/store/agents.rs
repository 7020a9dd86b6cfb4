use rusqlite::params;
use serde::Deserialize;

use super::types::*;
use super::{AGENT_COLS, Store, agent_from_row};
use crate::core::error::{CoreError, CoreResult};

/// Registration payload for a new agent.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAgent {
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<AgentType>,
    pub parent_agent_id: Option<String>,
    pub soul_md: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub config: Option<serde_json::Value>,
}

impl Store {
    pub async fn create_agent(&self, new: NewAgent, now: u64) -> CoreResult<Agent> {
        let id = new
            .id
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let kind = new.kind.unwrap_or(AgentType::Primary);
        let skills = serde_json::to_string(&new.skills).unwrap_or_else(|_| "[]".into());
        let config = new
            .config
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "{}".into());

        let conn = self.conn().lock().await;
        if let Some(parent) = &new.parent_agent_id {
            let exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM agents WHERE id = ?1",
                params![parent],
                |r| r.get(0),
            )?;
            if exists == 0 {
                return Err(CoreError::Validation(format!(
                    "parent_agent_id {parent} does not reference a registered agent"
                )));
            }
        }

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO agents (id, name, type, parent_agent_id, status, soul_md, skills, config, created_at)
             VALUES (?1, ?2, ?3, ?4, 'idle', ?5, ?6, ?7, ?8)",
            params![id, new.name, kind.as_str(), new.parent_agent_id, new.soul_md, skills, config, now as i64],
        )?;
        if inserted == 0 {
            return Err(CoreError::conflict(format!("agent {id} already exists")));
        }

        let agent = conn.query_row(
            &format!("SELECT {AGENT_COLS} FROM agents WHERE id = ?1"),
            params![id],
            agent_from_row,
        )?;
        Ok(agent)
    }

    pub async fn get_agent(&self, id: &str) -> CoreResult<Option<Agent>> {
        super::retry_read(|| self.get_agent_once(id)).await
    }

    async fn get_agent_once(&self, id: &str) -> CoreResult<Option<Agent>> {
        let conn = self.conn().lock().await;
        let mut stmt = conn.prepare(&format!("SELECT {AGENT_COLS} FROM agents WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], agent_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn list_agents(&self, filter: &AgentFilter) -> CoreResult<Vec<Agent>> {
        let mut sql = format!("SELECT {AGENT_COLS} FROM agents WHERE 1=1");
        let mut args: Vec<String> = Vec::new();
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            args.push(status.as_str().to_string());
        }
        if let Some(kind) = filter.kind {
            sql.push_str(" AND type = ?");
            args.push(kind.as_str().to_string());
        }
        if let Some(parent) = &filter.parent_agent_id {
            sql.push_str(" AND parent_agent_id = ?");
            args.push(parent.clone());
        }
        sql.push_str(" ORDER BY created_at");

        let conn = self.conn().lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), agent_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Update mutable profile fields. Fails `NotFound` when the agent is gone.
    pub async fn update_agent(&self, id: &str, patch: &AgentPatch) -> CoreResult<Agent> {
        let conn = self.conn().lock().await;
        let updated = conn.execute(
            "UPDATE agents SET
                name = COALESCE(?2, name),
                soul_md = COALESCE(?3, soul_md),
                skills = COALESCE(?4, skills),
                config = COALESCE(?5, config)
             WHERE id = ?1",
            params![
                id,
                patch.name,
                patch.soul_md,
                patch
                    .skills
                    .as_ref()
                    .map(|s| serde_json::to_string(s).unwrap_or_else(|_| "[]".into())),
                patch.config.as_ref().map(|c| c.to_string()),
            ],
        )?;
        if updated == 0 {
            return Err(CoreError::not_found(format!("agent {id}")));
        }
        let agent = conn.query_row(
            &format!("SELECT {AGENT_COLS} FROM agents WHERE id = ?1"),
            params![id],
            agent_from_row,
        )?;
        Ok(agent)
    }

    /// Remove the agent and cascade-delete its tasks in one transaction.
    pub async fn delete_agent(&self, id: &str) -> CoreResult<bool> {
        self.with_tx(|tx| {
            tx.execute("DELETE FROM agent_tasks WHERE agent_id = ?1", params![id])?;
            let removed = tx.execute("DELETE FROM agents WHERE id = ?1", params![id])?;
            Ok(removed > 0)
        })
        .await
    }

    pub async fn set_heartbeat(&self, id: &str, now: u64) -> CoreResult<bool> {
        let conn = self.conn().lock().await;
        let updated = conn.execute(
            "UPDATE agents SET last_heartbeat = ?2 WHERE id = ?1",
            params![id, now as i64],
        )?;
        Ok(updated > 0)
    }

    /// Set the lifecycle fields in one statement. `current_task_id` is always
    /// written, so passing `None` clears it.
    pub async fn set_agent_state(
        &self,
        id: &str,
        status: AgentStatus,
        current_task_id: Option<&str>,
    ) -> CoreResult<bool> {
        let conn = self.conn().lock().await;
        let updated = conn.execute(
            "UPDATE agents SET status = ?2, current_task_id = ?3 WHERE id = ?1",
            params![id, status.as_str(), current_task_id],
        )?;
        Ok(updated > 0)
    }

    pub async fn find_agent_by_normalized_name(&self, name: &str) -> CoreResult<Option<Agent>> {
        let wanted = name.trim().to_lowercase();
        let conn = self.conn().lock().await;
        let mut stmt = conn.prepare(&format!("SELECT {AGENT_COLS} FROM agents"))?;
        let rows = stmt.query_map([], agent_from_row)?;
        for row in rows {
            let agent = row?;
            if agent.name.trim().to_lowercase() == wanted {
                return Ok(Some(agent));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::open_test_store;

    fn new_agent(id: &str, name: &str) -> NewAgent {
        NewAgent {
            id: Some(id.to_string()),
            name: name.to_string(),
            kind: None,
            parent_agent_id: None,
            soul_md: None,
            skills: vec![],
            config: None,
        }
    }

    #[tokio::test]
    async fn create_and_fetch_agent() {
        let (_dir, store) = open_test_store();
        let agent = store.create_agent(new_agent("a1", "builder"), 100).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.created_at, 100);

        let fetched = store.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "builder");
        assert!(store.get_agent("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let (_dir, store) = open_test_store();
        store.create_agent(new_agent("a1", "builder"), 1).await.unwrap();
        let err = store.create_agent(new_agent("a1", "other"), 2).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_filters_by_status_and_parent() {
        let (_dir, store) = open_test_store();
        store.create_agent(new_agent("a1", "root"), 1).await.unwrap();
        let mut sub = new_agent("a2", "child");
        sub.kind = Some(AgentType::SubAgent);
        sub.parent_agent_id = Some("a1".into());
        store.create_agent(sub, 2).await.unwrap();
        store
            .set_agent_state("a2", AgentStatus::Working, Some("t1"))
            .await
            .unwrap();

        let working = store
            .list_agents(&AgentFilter {
                status: Some(AgentStatus::Working),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(working.len(), 1);
        assert_eq!(working[0].id, "a2");

        let children = store
            .list_agents(&AgentFilter {
                parent_agent_id: Some("a1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(children.len(), 1);
    }

    #[tokio::test]
    async fn unknown_parent_is_rejected() {
        let (_dir, store) = open_test_store();
        let mut bad = new_agent("a1", "orphan");
        bad.parent_agent_id = Some("ghost".into());
        let err = store.create_agent(bad, 1).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn name_lookup_is_normalized() {
        let (_dir, store) = open_test_store();
        store
            .create_agent(new_agent("a1", "Agent Match"), 1)
            .await
            .unwrap();
        let found = store
            .find_agent_by_normalized_name("  agent match ")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, "a1");
    }
}
