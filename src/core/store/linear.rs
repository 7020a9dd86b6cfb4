use rusqlite::params;

use super::types::*;
use super::Store;
use crate::core::error::CoreResult;

/// Field-level patch for the issue mirror. Absent fields keep their prior
/// value, so replaying the same webhook body is a no-op after the first
/// delivery.
#[derive(Debug, Clone, Default)]
pub struct LinearIssuePatch {
    pub identifier: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub state_type: Option<String>,
    pub state_name: Option<String>,
    pub assignee_name: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LinearProjectPatch {
    pub name: Option<String>,
    pub state: Option<String>,
}

const ISSUE_COLS: &str = "id, identifier, title, description, priority, state_type, state_name, \
     assignee_name, project_id, agent_task_id, updated_at";

fn issue_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LinearIssue> {
    Ok(LinearIssue {
        id: row.get(0)?,
        identifier: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        priority: row.get(4)?,
        state_type: row.get(5)?,
        state_name: row.get(6)?,
        assignee_name: row.get(7)?,
        project_id: row.get(8)?,
        agent_task_id: row.get(9)?,
        updated_at: row.get::<_, i64>(10)? as u64,
    })
}

impl Store {
    /// Last-write-wins on fields present in the patch; `agent_task_id` is
    /// never touched by upserts, only by [`Store::link_issue_to_task`].
    pub async fn upsert_linear_issue(
        &self,
        id: &str,
        patch: LinearIssuePatch,
        now: u64,
    ) -> CoreResult<LinearIssue> {
        let conn = self.conn().lock().await;

        let prior = {
            let mut stmt =
                conn.prepare(&format!("SELECT {ISSUE_COLS} FROM linear_issues WHERE id = ?1"))?;
            let mut rows = stmt.query_map(params![id], issue_from_row)?;
            match rows.next() {
                Some(row) => Some(row?),
                None => None,
            }
        };
        let prior = prior.unwrap_or_default();

        let merged = LinearIssue {
            id: id.to_string(),
            identifier: patch.identifier.or(prior.identifier),
            title: patch.title.or(prior.title),
            description: patch.description.or(prior.description),
            priority: patch.priority.or(prior.priority),
            state_type: patch.state_type.or(prior.state_type),
            state_name: patch.state_name.or(prior.state_name),
            assignee_name: patch.assignee_name.or(prior.assignee_name),
            project_id: patch.project_id.or(prior.project_id),
            agent_task_id: prior.agent_task_id,
            updated_at: now,
        };

        conn.execute(
            "INSERT OR REPLACE INTO linear_issues \
             (id, identifier, title, description, priority, state_type, state_name, \
              assignee_name, project_id, agent_task_id, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                merged.id,
                merged.identifier,
                merged.title,
                merged.description,
                merged.priority,
                merged.state_type,
                merged.state_name,
                merged.assignee_name,
                merged.project_id,
                merged.agent_task_id,
                merged.updated_at as i64
            ],
        )?;
        Ok(merged)
    }

    pub async fn get_linear_issue(&self, id: &str) -> CoreResult<Option<LinearIssue>> {
        let conn = self.conn().lock().await;
        let mut stmt =
            conn.prepare(&format!("SELECT {ISSUE_COLS} FROM linear_issues WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], issue_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn delete_linear_issue(&self, id: &str) -> CoreResult<bool> {
        let conn = self.conn().lock().await;
        let removed = conn.execute("DELETE FROM linear_issues WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    pub async fn link_issue_to_task(&self, issue_id: &str, task_id: &str) -> CoreResult<bool> {
        let conn = self.conn().lock().await;
        let updated = conn.execute(
            "UPDATE linear_issues SET agent_task_id = ?2 WHERE id = ?1",
            params![issue_id, task_id],
        )?;
        Ok(updated > 0)
    }

    pub async fn upsert_linear_project(
        &self,
        id: &str,
        patch: LinearProjectPatch,
        now: u64,
    ) -> CoreResult<LinearProject> {
        let conn = self.conn().lock().await;
        let prior: Option<(Option<String>, Option<String>)> = {
            let mut stmt =
                conn.prepare("SELECT name, state FROM linear_projects WHERE id = ?1")?;
            let mut rows = stmt.query_map(params![id], |r| Ok((r.get(0)?, r.get(1)?)))?;
            match rows.next() {
                Some(row) => Some(row?),
                None => None,
            }
        };
        let (prior_name, prior_state) = prior.unwrap_or((None, None));

        let merged = LinearProject {
            id: id.to_string(),
            name: patch.name.or(prior_name),
            state: patch.state.or(prior_state),
            updated_at: now,
        };
        conn.execute(
            "INSERT OR REPLACE INTO linear_projects (id, name, state, updated_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![merged.id, merged.name, merged.state, merged.updated_at as i64],
        )?;
        Ok(merged)
    }

    pub async fn delete_linear_project(&self, id: &str) -> CoreResult<bool> {
        let conn = self.conn().lock().await;
        let removed = conn.execute("DELETE FROM linear_projects WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    pub async fn upsert_workflow_state(&self, state: &LinearWorkflowState) -> CoreResult<()> {
        let conn = self.conn().lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO linear_workflow_states (id, name, type, color) \
             VALUES (?1, ?2, ?3, ?4)",
            params![state.id, state.name, state.kind, state.color],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::open_test_store;

    #[tokio::test]
    async fn upsert_merges_absent_fields_from_prior_row() {
        let (_dir, store) = open_test_store();
        store
            .upsert_linear_issue(
                "I1",
                LinearIssuePatch {
                    title: Some("fix login".into()),
                    priority: Some(3),
                    assignee_name: Some("Agent Match".into()),
                    ..Default::default()
                },
                10,
            )
            .await
            .unwrap();

        // A later payload without the assignee keeps the prior assignee.
        let merged = store
            .upsert_linear_issue(
                "I1",
                LinearIssuePatch {
                    state_type: Some("started".into()),
                    ..Default::default()
                },
                20,
            )
            .await
            .unwrap();
        assert_eq!(merged.title.as_deref(), Some("fix login"));
        assert_eq!(merged.assignee_name.as_deref(), Some("Agent Match"));
        assert_eq!(merged.state_type.as_deref(), Some("started"));
        assert_eq!(merged.updated_at, 20);
    }

    #[tokio::test]
    async fn replaying_the_same_patch_is_idempotent() {
        let (_dir, store) = open_test_store();
        let patch = LinearIssuePatch {
            title: Some("x".into()),
            priority: Some(2),
            ..Default::default()
        };
        let first = store.upsert_linear_issue("I1", patch.clone(), 10).await.unwrap();
        let second = store.upsert_linear_issue("I1", patch, 10).await.unwrap();
        assert_eq!(first.title, second.title);
        assert_eq!(first.priority, second.priority);
        assert_eq!(first.agent_task_id, second.agent_task_id);
    }

    #[tokio::test]
    async fn task_link_survives_upserts() {
        let (_dir, store) = open_test_store();
        store
            .upsert_linear_issue("I1", LinearIssuePatch::default(), 10)
            .await
            .unwrap();
        assert!(store.link_issue_to_task("I1", "linear_I1").await.unwrap());

        let merged = store
            .upsert_linear_issue(
                "I1",
                LinearIssuePatch {
                    title: Some("renamed".into()),
                    ..Default::default()
                },
                20,
            )
            .await
            .unwrap();
        assert_eq!(merged.agent_task_id.as_deref(), Some("linear_I1"));
    }

    #[tokio::test]
    async fn delete_removes_the_mirror_row() {
        let (_dir, store) = open_test_store();
        store
            .upsert_linear_issue("I1", LinearIssuePatch::default(), 10)
            .await
            .unwrap();
        assert!(store.delete_linear_issue("I1").await.unwrap());
        assert!(!store.delete_linear_issue("I1").await.unwrap());
        assert!(store.get_linear_issue("I1").await.unwrap().is_none());
    }
}
