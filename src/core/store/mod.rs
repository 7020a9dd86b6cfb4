mod agents;
mod linear;
mod messages;
mod rules;
mod tasks;

pub mod crypto;
pub mod types;

pub use agents::NewAgent;
pub use linear::{LinearIssuePatch, LinearProjectPatch};
pub use tasks::NewTask;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::error::{CoreError, CoreResult};
use crypto::MessageCrypto;
use types::*;

pub const DB_FILE: &str = "fleethub.db";

/// Single-file transactional row store. Owns row persistence exclusively;
/// every public operation is atomic per call and compound mutations run
/// inside one transaction via [`Store::with_tx`].
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    crypto: MessageCrypto,
}

impl Store {
    pub fn open(data_dir: &Path) -> CoreResult<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| CoreError::Transient(format!("creating data dir: {e}")))?;

        let crypto = MessageCrypto::load_or_create(data_dir)?;

        let db_path = data_dir.join(DB_FILE);
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // Bounded wait on a locked database; a slower writer surfaces as Transient.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        init_schema(&conn)?;
        info!("Store opened at {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            crypto,
        })
    }

    pub(crate) fn crypto(&self) -> &MessageCrypto {
        &self.crypto
    }

    pub(crate) fn conn(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// Run `f` inside a single transaction. An `Err` from the closure rolls
    /// the whole transaction back; cancellation before commit leaves no
    /// partial writes.
    pub async fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            type TEXT NOT NULL DEFAULT 'primary',
            parent_agent_id TEXT,
            status TEXT NOT NULL DEFAULT 'idle',
            current_task_id TEXT,
            last_heartbeat INTEGER,
            soul_md TEXT,
            skills TEXT NOT NULL DEFAULT '[]',
            config TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status);

        CREATE TABLE IF NOT EXISTS agent_tasks (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            linear_issue_id TEXT,
            project_id TEXT,
            title TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            priority TEXT NOT NULL DEFAULT 'medium',
            blocked_reason TEXT,
            blocked_at INTEGER,
            started_at INTEGER,
            completed_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_agent_tasks_agent ON agent_tasks(agent_id);

        CREATE TABLE IF NOT EXISTS alert_rules (
            id TEXT PRIMARY KEY,
            "trigger" TEXT NOT NULL,
            priority_filter TEXT NOT NULL DEFAULT 'all',
            delay_ms INTEGER NOT NULL DEFAULT 0,
            channel TEXT NOT NULL DEFAULT 'in_app',
            enabled INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL,
            content TEXT NOT NULL,
            todo_id TEXT,
            session_id TEXT,
            project_id TEXT,
            read INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at DESC);

        CREATE TABLE IF NOT EXISTS linear_issues (
            id TEXT PRIMARY KEY,
            identifier TEXT,
            title TEXT,
            description TEXT,
            priority INTEGER,
            state_type TEXT,
            state_name TEXT,
            assignee_name TEXT,
            project_id TEXT,
            agent_task_id TEXT,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_linear_issues_project ON linear_issues(project_id);

        CREATE TABLE IF NOT EXISTS linear_projects (
            id TEXT PRIMARY KEY,
            name TEXT,
            state TEXT,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS linear_workflow_states (
            id TEXT PRIMARY KEY,
            name TEXT,
            type TEXT,
            color TEXT
        );
        "#,
    )
}

/// Retry an idempotent read at most twice on `Transient` failures. Writes are
/// never retried here; their callers decide.
pub(crate) async fn retry_read<T, F, Fut>(op: F) -> CoreResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = CoreResult<T>>,
{
    let mut attempts = 0;
    loop {
        match op().await {
            Err(CoreError::Transient(msg)) if attempts < 2 => {
                attempts += 1;
                tracing::debug!("transient read failure, retrying (attempt {attempts}): {msg}");
            }
            other => return other,
        }
    }
}

// --- Row mapping helpers shared by the entity modules ---

pub(crate) fn parse_col<T>(
    idx: usize,
    raw: &str,
    f: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    f(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unrecognised value: {raw}").into(),
        )
    })
}

pub(crate) fn agent_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    let kind: String = row.get(2)?;
    let status: String = row.get(4)?;
    let skills: String = row.get(8)?;
    let config: String = row.get(9)?;
    Ok(Agent {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: parse_col(2, &kind, AgentType::parse)?,
        parent_agent_id: row.get(3)?,
        status: parse_col(4, &status, AgentStatus::parse)?,
        current_task_id: row.get(5)?,
        last_heartbeat: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
        soul_md: row.get(7)?,
        skills: serde_json::from_str(&skills).unwrap_or_default(),
        config: serde_json::from_str(&config).unwrap_or(serde_json::Value::Null),
        created_at: row.get::<_, i64>(10)? as u64,
    })
}

pub(crate) const AGENT_COLS: &str = "id, name, type, parent_agent_id, status, current_task_id, \
     last_heartbeat, soul_md, skills, config, created_at";

pub(crate) fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentTask> {
    let status: String = row.get(5)?;
    let priority: String = row.get(6)?;
    Ok(AgentTask {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        linear_issue_id: row.get(2)?,
        project_id: row.get(3)?,
        title: row.get(4)?,
        status: parse_col(5, &status, TaskStatus::parse)?,
        priority: parse_col(6, &priority, TaskPriority::parse)?,
        blocked_reason: row.get(7)?,
        blocked_at: row.get::<_, Option<i64>>(8)?.map(|v| v as u64),
        started_at: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
        completed_at: row.get::<_, Option<i64>>(10)?.map(|v| v as u64),
        created_at: row.get::<_, i64>(11)? as u64,
        updated_at: row.get::<_, i64>(12)? as u64,
    })
}

pub(crate) const TASK_COLS: &str = "id, agent_id, linear_issue_id, project_id, title, status, \
     priority, blocked_reason, blocked_at, started_at, completed_at, created_at, updated_at";

pub(crate) fn rule_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRule> {
    let trigger: String = row.get(1)?;
    let filter: String = row.get(2)?;
    let channel: String = row.get(4)?;
    Ok(AlertRule {
        id: row.get(0)?,
        trigger: parse_col(1, &trigger, AlertTrigger::parse)?,
        priority_filter: parse_col(2, &filter, PriorityFilter::parse)?,
        delay_ms: row.get::<_, i64>(3)? as u64,
        channel: parse_col(4, &channel, AlertChannel::parse)?,
        enabled: row.get::<_, i64>(5)? != 0,
    })
}

pub(crate) const RULE_COLS: &str = r#"id, "trigger", priority_filter, delay_ms, channel, enabled"#;

#[cfg(test)]
pub(crate) fn open_test_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(dir.path()).expect("open store");
    (dir, store)
}
