mod sleep;
mod transitions;

pub use sleep::SleepSchedule;
pub use transitions::{agent_transition_allowed, task_transition_allowed};

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::core::alerts::{AlertEngine, AlertEvent};
use crate::core::bus::{EventBus, EventKind};
use crate::core::clock::{Clock, TimerHandle, TimerService};
use crate::core::error::{CoreError, CoreResult};
use crate::core::store::types::*;
use crate::core::store::{NewAgent, NewTask, Store};

/// A working agent whose heartbeat is older than this while holding a task is
/// presumed blocked. The monitor is armed one second past the threshold so a
/// heartbeat landing exactly on it does not fire.
const IDLE_BLOCK_SECS: u64 = 300;
/// Pending work with no heartbeat for this long raises `idle_too_long`.
const IDLE_ALERT_SECS: u64 = 1_800;
const ERROR_WINDOW_SECS: u64 = 600;
const ERROR_BLOCK_THRESHOLD: u32 = 3;
const ERROR_SLEEP_THRESHOLD: u32 = 5;
/// Cross-agent push throttle: fixed window from the first send.
const PUSH_WINDOW_MS: u64 = 3_600_000;
const PUSH_WINDOW_CAP: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSource {
    Explicit,
    Question,
    RepeatedErrors,
    Idle,
    ResourceDenied,
}

impl BlockSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockSource::Explicit => "explicit",
            BlockSource::Question => "question",
            BlockSource::RepeatedErrors => "repeated_errors",
            BlockSource::Idle => "idle",
            BlockSource::ResourceDenied => "resource_denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "explicit" => Some(BlockSource::Explicit),
            "question" => Some(BlockSource::Question),
            "repeated_errors" => Some(BlockSource::RepeatedErrors),
            "idle" => Some(BlockSource::Idle),
            "resource_denied" => Some(BlockSource::ResourceDenied),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockContext {
    pub source: BlockSource,
    pub reason: String,
    pub task_id: String,
}

/// PATCH payload for one task.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub priority: Option<TaskPriority>,
    pub status: Option<TaskStatus>,
    pub reason: Option<String>,
}

struct ErrorWindow {
    window_start: u64,
    count: u32,
}

struct PushWindow {
    started_ms: u64,
    count: u32,
}

/// The agent and task state machines plus the watchdog policies around them.
///
/// Every mutation for one agent runs inside that agent's critical section;
/// when an operation must touch several agents the locks are taken in
/// ascending agent-id order. The transient maps here (idle timers, error
/// windows, push windows) are process-local and rebuilt by
/// [`LifecycleManager::reconcile`] after a restart.
///
/// Dependency direction is one-way: this manager feeds the alert engine and
/// the event bus; neither ever calls back into it.
pub struct LifecycleManager {
    store: Arc<Store>,
    bus: Arc<EventBus>,
    alerts: Arc<AlertEngine>,
    clock: Clock,
    timers: TimerService,
    agent_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    idle_timers: StdMutex<HashMap<String, TimerHandle>>,
    error_windows: StdMutex<HashMap<(String, String), ErrorWindow>>,
    push_windows: StdMutex<HashMap<String, PushWindow>>,
    sleep_schedule: StdMutex<SleepSchedule>,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<Store>,
        bus: Arc<EventBus>,
        alerts: Arc<AlertEngine>,
        clock: Clock,
        timers: TimerService,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            alerts,
            clock,
            timers,
            agent_locks: StdMutex::new(HashMap::new()),
            idle_timers: StdMutex::new(HashMap::new()),
            error_windows: StdMutex::new(HashMap::new()),
            push_windows: StdMutex::new(HashMap::new()),
            sleep_schedule: StdMutex::new(SleepSchedule::default()),
        })
    }

    fn agent_lock(&self, agent_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.agent_locks.lock().unwrap();
        locks
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn publish_agent_status(&self, agent_id: &str, status: &str, action: &str, extra: serde_json::Value) {
        let mut payload = json!({
            "agent_id": agent_id,
            "status": status,
            "action": action,
        });
        if let (Some(map), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                map.insert(k.clone(), v.clone());
            }
        }
        self.bus.publish(EventKind::AgentStatus, payload);
    }

    fn publish_task(&self, kind: EventKind, task: &AgentTask) {
        let payload = serde_json::to_value(task).unwrap_or_else(|_| json!({ "id": task.id }));
        self.bus.publish(kind, payload);
    }

    // --- Registration and profile ---

    pub async fn register_agent(&self, new: NewAgent) -> CoreResult<Agent> {
        let agent = self.store.create_agent(new, self.clock.now()).await?;
        info!("Agent [{}] registered as {}", agent.id, agent.name);
        self.publish_agent_status(&agent.id, agent.status.as_str(), "registered", json!({}));
        Ok(agent)
    }

    pub async fn remove_agent(self: &Arc<Self>, agent_id: &str) -> CoreResult<bool> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        self.cancel_idle_monitor(agent_id);
        self.alerts.cancel_pending_alerts(agent_id, None);
        self.error_windows
            .lock()
            .unwrap()
            .retain(|(agent, _), _| agent != agent_id);
        self.push_windows.lock().unwrap().remove(agent_id);

        let removed = self.store.delete_agent(agent_id).await?;
        if removed {
            info!("Agent [{agent_id}] removed");
            self.publish_agent_status(agent_id, "offline", "removed", json!({}));
        }
        Ok(removed)
    }

    // --- Assignment ---

    /// Create the task in `pending` and advance the agent to `working` when
    /// it is free to take it. Arms the idle monitor.
    pub async fn assign_task(self: &Arc<Self>, agent_id: &str, new: NewTask) -> CoreResult<AgentTask> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let task = self.store.apply_assignment(agent_id, new, now).await?;

        if let Some(issue_id) = &task.linear_issue_id {
            // Best effort: a missing mirror row is logged, never fatal.
            match self.store.link_issue_to_task(issue_id, &task.id).await {
                Ok(true) => {}
                Ok(false) => warn!(
                    "linear issue {issue_id} not mirrored yet; task {} left unlinked",
                    task.id
                ),
                Err(e) => warn!("linking linear issue {issue_id} to task {} failed: {e}", task.id),
            }
        }

        self.arm_idle_monitor(agent_id);

        info!(
            "Agent [{agent_id}] assigned task {} ({} priority)",
            task.id,
            task.priority.as_str()
        );
        self.publish_agent_status(
            agent_id,
            AgentStatus::Working.as_str(),
            "task_assigned",
            json!({ "task_id": task.id }),
        );
        self.publish_task(EventKind::TodoCreated, &task);
        Ok(task)
    }

    // --- Heartbeat and idle monitor ---

    pub async fn refresh_heartbeat(self: &Arc<Self>, agent_id: &str) -> CoreResult<()> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        if !self.store.set_heartbeat(agent_id, now).await? {
            return Err(CoreError::not_found(format!("agent {agent_id}")));
        }
        self.arm_idle_monitor(agent_id);
        Ok(())
    }

    fn arm_idle_monitor(self: &Arc<Self>, agent_id: &str) {
        let manager = Arc::clone(self);
        let id = agent_id.to_string();
        let handle = self
            .timers
            .schedule(Duration::from_secs(IDLE_BLOCK_SECS + 1), async move {
                manager.idle_fire(id).await;
            });
        if let Some(old) = self.idle_timers.lock().unwrap().insert(agent_id.to_string(), handle) {
            old.cancel();
        }
    }

    fn cancel_idle_monitor(&self, agent_id: &str) {
        if let Some(handle) = self.idle_timers.lock().unwrap().remove(agent_id) {
            handle.cancel();
        }
    }

    async fn idle_fire(self: Arc<Self>, agent_id: String) {
        let lock = self.agent_lock(&agent_id);
        let _guard = lock.lock().await;

        let agent = match self.store.get_agent(&agent_id).await {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                self.idle_timers.lock().unwrap().remove(&agent_id);
                return;
            }
            Err(e) => {
                warn!("idle monitor for [{agent_id}] could not load the agent: {e}");
                return;
            }
        };
        if matches!(agent.status, AgentStatus::Offline | AgentStatus::Sleeping) {
            self.idle_timers.lock().unwrap().remove(&agent_id);
            return;
        }

        let now = self.clock.now();
        let last_seen = agent.last_heartbeat.unwrap_or(agent.created_at);
        let idle_for = now.saturating_sub(last_seen);

        if agent.status == AgentStatus::Working && idle_for > IDLE_BLOCK_SECS {
            if let Some(task_id) = agent.current_task_id.clone() {
                let reason = format!("idle {} minutes with in_progress task", idle_for / 60);
                if let Err(e) = self
                    .block_inner(
                        &agent_id,
                        BlockContext {
                            source: BlockSource::Idle,
                            reason,
                            task_id,
                        },
                    )
                    .await
                {
                    warn!("idle block for [{agent_id}] failed: {e}");
                }
            }
        } else if idle_for > IDLE_ALERT_SECS {
            match self.store.pending_tasks(&agent_id).await {
                Ok(pending) if !pending.is_empty() => {
                    let first = &pending[0];
                    self.alerts
                        .process_event(AlertEvent {
                            trigger: AlertTrigger::IdleTooLong,
                            agent_id: agent_id.clone(),
                            task_id: first.id.clone(),
                            title: first.title.clone(),
                            priority: TaskPriority::Medium,
                            reason: None,
                            project_id: first.project_id.clone(),
                        })
                        .await;
                }
                Ok(_) => {}
                Err(e) => warn!("idle monitor for [{agent_id}] could not list pending tasks: {e}"),
            }
        }

        // Keep watching until the agent is parked or removed.
        self.arm_idle_monitor(&agent_id);
    }

    // --- Error aggregation ---

    /// Sliding-window error counter per `(agent, task)`. The third error in
    /// ten minutes blocks the task; the fifth additionally puts the agent to
    /// sleep. Returns whether an escalation was triggered.
    pub async fn record_error(self: &Arc<Self>, agent_id: &str, task_id: &str) -> CoreResult<bool> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let Some(task) = self
            .store
            .get_task(task_id)
            .await?
            .filter(|t| t.agent_id == agent_id)
        else {
            warn!("error report for unknown task {task_id} on agent [{agent_id}] ignored");
            return Ok(false);
        };

        let now = self.clock.now();
        let (count, window_start) = {
            let mut windows = self.error_windows.lock().unwrap();
            let window = windows
                .entry((agent_id.to_string(), task_id.to_string()))
                .or_insert(ErrorWindow {
                    window_start: now,
                    count: 0,
                });
            if now.saturating_sub(window.window_start) > ERROR_WINDOW_SECS {
                window.window_start = now;
                window.count = 0;
            }
            window.count += 1;
            (window.count, window.window_start)
        };

        self.alerts
            .process_event(AlertEvent {
                trigger: AlertTrigger::Error,
                agent_id: agent_id.to_string(),
                task_id: task_id.to_string(),
                title: task.title.clone(),
                priority: task.priority,
                reason: Some(format!("error {count} in current window")),
                project_id: task.project_id.clone(),
            })
            .await;

        if count == ERROR_BLOCK_THRESHOLD {
            let reason = format!("{count} consecutive errors in {}s", now - window_start);
            self.block_inner(
                agent_id,
                BlockContext {
                    source: BlockSource::RepeatedErrors,
                    reason,
                    task_id: task_id.to_string(),
                },
            )
            .await?;
            return Ok(true);
        }
        if count == ERROR_SLEEP_THRESHOLD {
            self.sleep_inner(agent_id, "error_threshold").await?;
            return Ok(true);
        }
        Ok(false)
    }

    // --- Blocking ---

    pub async fn detect_blocked(self: &Arc<Self>, agent_id: &str, ctx: BlockContext) -> CoreResult<()> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;
        self.block_inner(agent_id, ctx).await
    }

    async fn block_inner(&self, agent_id: &str, ctx: BlockContext) -> CoreResult<()> {
        let now = self.clock.now();
        let reason = format!("[{}] {}", ctx.source.as_str(), ctx.reason);

        let Some(task) = self
            .store
            .apply_block(agent_id, &ctx.task_id, &reason, now)
            .await?
        else {
            warn!(
                "block for agent [{agent_id}] task {} skipped: task missing or settled, or the \
                 agent has no edge into blocked from its current status",
                ctx.task_id
            );
            return Ok(());
        };

        info!("Agent [{agent_id}] blocked on task {}: {reason}", task.id);

        // A block invalidates any pending completion for this task.
        self.alerts
            .cancel_trigger(agent_id, &task.id, AlertTrigger::Completed);

        self.alerts
            .process_event(AlertEvent {
                trigger: AlertTrigger::Blocked,
                agent_id: agent_id.to_string(),
                task_id: task.id.clone(),
                title: task.title.clone(),
                priority: task.priority,
                reason: Some(ctx.reason.clone()),
                project_id: task.project_id.clone(),
            })
            .await;

        self.publish_agent_status(
            agent_id,
            AgentStatus::Blocked.as_str(),
            "blocked",
            json!({ "task_id": task.id, "reason": reason }),
        );
        self.publish_task(EventKind::TodoUpdated, &task);
        Ok(())
    }

    /// Resolve a blocked agent back to `working` on its blocked task.
    /// Returns the task and how many pending alerts the unblock cancelled.
    pub async fn unblock(self: &Arc<Self>, agent_id: &str) -> CoreResult<(AgentTask, usize)> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("agent {agent_id}")))?;

        let task_id = match agent.current_task_id.clone() {
            Some(id) => id,
            None => {
                let tasks = self.store.list_tasks_by_agent(agent_id).await?;
                tasks
                    .into_iter()
                    .find(|t| t.status == TaskStatus::Blocked)
                    .map(|t| t.id)
                    .ok_or_else(|| {
                        CoreError::conflict(format!("agent {agent_id} has nothing to unblock"))
                    })?
            }
        };

        let now = self.clock.now();
        let task = self.store.start_task(agent_id, &task_id, now).await?;
        let cancelled = self.alerts.cancel_pending_alerts(agent_id, Some(&task_id));

        info!("Agent [{agent_id}] unblocked on task {task_id} ({cancelled} pending alerts dropped)");
        self.publish_agent_status(
            agent_id,
            AgentStatus::Working.as_str(),
            "unblocked",
            json!({ "task_id": task_id }),
        );
        self.publish_task(EventKind::TodoUpdated, &task);
        Ok((task, cancelled))
    }

    // --- Completion ---

    pub async fn complete_task(self: &Arc<Self>, agent_id: &str, task_id: &str) -> CoreResult<AgentTask> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;
        self.complete_inner(agent_id, task_id).await
    }

    async fn complete_inner(&self, agent_id: &str, task_id: &str) -> CoreResult<AgentTask> {
        let now = self.clock.now();
        let park = if self.sleep_window_active() {
            AgentStatus::Sleeping
        } else {
            AgentStatus::Idle
        };

        let (task, status_after) = self.store.finish_task(agent_id, task_id, now, park).await?;

        self.cancel_idle_monitor(agent_id);
        self.error_windows
            .lock()
            .unwrap()
            .remove(&(agent_id.to_string(), task_id.to_string()));
        self.alerts
            .cancel_trigger(agent_id, task_id, AlertTrigger::Blocked);

        self.alerts
            .process_event(AlertEvent {
                trigger: AlertTrigger::Completed,
                agent_id: agent_id.to_string(),
                task_id: task.id.clone(),
                title: task.title.clone(),
                priority: task.priority,
                reason: None,
                project_id: task.project_id.clone(),
            })
            .await;

        info!(
            "Agent [{agent_id}] completed task {task_id}, now {}",
            status_after.as_str()
        );
        self.publish_agent_status(
            agent_id,
            status_after.as_str(),
            "task_completed",
            json!({ "task_id": task_id }),
        );
        self.publish_task(EventKind::TodoUpdated, &task);
        Ok(task)
    }

    async fn cancel_inner(&self, agent_id: &str, task_id: &str) -> CoreResult<AgentTask> {
        let now = self.clock.now();
        let (task, had_pending) = self.store.cancel_task(agent_id, task_id, now).await?;

        self.error_windows
            .lock()
            .unwrap()
            .remove(&(agent_id.to_string(), task_id.to_string()));
        self.alerts.cancel_pending_alerts(agent_id, Some(task_id));
        if !had_pending {
            self.cancel_idle_monitor(agent_id);
        }

        info!("Agent [{agent_id}] task {task_id} cancelled");
        self.publish_task(EventKind::TodoUpdated, &task);
        Ok(task)
    }

    // --- Task updates through the API ---

    /// Apply a PATCH. Status changes route through the state machines; an
    /// edge the machines do not allow is a `Conflict`.
    pub async fn update_task(
        self: &Arc<Self>,
        agent_id: &str,
        task_id: &str,
        patch: TaskPatch,
    ) -> CoreResult<AgentTask> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let mut task = self
            .store
            .get_task(task_id)
            .await?
            .filter(|t| t.agent_id == agent_id)
            .ok_or_else(|| CoreError::not_found(format!("task {task_id}")))?;

        if patch.title.is_some() || patch.priority.is_some() {
            task = self
                .store
                .update_task_meta(task_id, patch.title.as_deref(), patch.priority, self.clock.now())
                .await?;
            self.publish_task(EventKind::TodoUpdated, &task);
        }

        let Some(next) = patch.status else {
            return Ok(task);
        };
        if next == task.status {
            return Ok(task);
        }
        if !task_transition_allowed(task.status, next) {
            return Err(CoreError::conflict(format!(
                "task {task_id} cannot move from {} to {}",
                task.status.as_str(),
                next.as_str()
            )));
        }

        match next {
            TaskStatus::InProgress => {
                let task = self.store.start_task(agent_id, task_id, self.clock.now()).await?;
                self.publish_task(EventKind::TodoUpdated, &task);
                Ok(task)
            }
            TaskStatus::Blocked => {
                self.block_inner(
                    agent_id,
                    BlockContext {
                        source: BlockSource::Explicit,
                        reason: patch
                            .reason
                            .unwrap_or_else(|| "marked blocked via API".to_string()),
                        task_id: task_id.to_string(),
                    },
                )
                .await?;
                self.store
                    .get_task(task_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found(format!("task {task_id}")))
            }
            TaskStatus::Completed => self.complete_inner(agent_id, task_id).await,
            TaskStatus::Cancelled => self.cancel_inner(agent_id, task_id).await,
            TaskStatus::Pending => Err(CoreError::conflict("tasks cannot return to pending")),
        }
    }

    // --- Sleep, wake, stop, restart ---

    pub async fn trigger_sleep(self: &Arc<Self>, agent_id: &str, reason: &str) -> CoreResult<()> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;
        self.sleep_inner(agent_id, reason).await
    }

    async fn sleep_inner(&self, agent_id: &str, reason: &str) -> CoreResult<()> {
        let Some(agent) = self.store.get_agent(agent_id).await? else {
            warn!("sleep requested for unknown agent [{agent_id}]");
            return Ok(());
        };
        if !agent_transition_allowed(agent.status, AgentStatus::Sleeping) {
            // Already sleeping or offline.
            return Ok(());
        }

        self.store
            .set_agent_state(agent_id, AgentStatus::Sleeping, agent.current_task_id.as_deref())
            .await?;
        self.cancel_idle_monitor(agent_id);

        info!("Agent [{agent_id}] sleeping ({reason})");
        self.publish_agent_status(
            agent_id,
            AgentStatus::Sleeping.as_str(),
            "sleep",
            json!({ "reason": reason }),
        );
        Ok(())
    }

    pub async fn trigger_wake(self: &Arc<Self>, agent_id: &str) -> CoreResult<()> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let Some(agent) = self.store.get_agent(agent_id).await? else {
            warn!("wake requested for unknown agent [{agent_id}]");
            return Ok(());
        };
        if agent.status != AgentStatus::Sleeping {
            return Ok(());
        }

        self.store
            .set_agent_state(agent_id, AgentStatus::Idle, agent.current_task_id.as_deref())
            .await?;
        info!("Agent [{agent_id}] woke up");
        self.publish_agent_status(agent_id, AgentStatus::Idle.as_str(), "wake", json!({}));
        Ok(())
    }

    /// Admin stop: cancels live tasks and parks the agent offline.
    pub async fn stop_agent(self: &Arc<Self>, agent_id: &str) -> CoreResult<Vec<String>> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        self.cancel_idle_monitor(agent_id);
        self.alerts.cancel_pending_alerts(agent_id, None);
        self.error_windows
            .lock()
            .unwrap()
            .retain(|(agent, _), _| agent != agent_id);

        let cancelled = self.store.apply_stop(agent_id, self.clock.now()).await?;
        info!(
            "Agent [{agent_id}] stopped; {} in-flight tasks cancelled",
            cancelled.len()
        );
        self.publish_agent_status(
            agent_id,
            AgentStatus::Offline.as_str(),
            "stopped",
            json!({ "cancelled_tasks": cancelled }),
        );
        for task_id in &cancelled {
            self.bus.publish(
                EventKind::TodoUpdated,
                json!({ "id": task_id, "status": "cancelled" }),
            );
        }
        Ok(cancelled)
    }

    /// Admin restart: back to `idle` with no current task. Tasks are left as
    /// they are.
    pub async fn restart_agent(self: &Arc<Self>, agent_id: &str) -> CoreResult<()> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        if !self
            .store
            .set_agent_state(agent_id, AgentStatus::Idle, None)
            .await?
        {
            return Err(CoreError::not_found(format!("agent {agent_id}")));
        }
        self.cancel_idle_monitor(agent_id);
        info!("Agent [{agent_id}] restarted to idle");
        self.publish_agent_status(agent_id, AgentStatus::Idle.as_str(), "restarted", json!({}));
        Ok(())
    }

    // --- Sleep window configuration ---

    pub fn sleep_schedule(&self) -> SleepSchedule {
        self.sleep_schedule.lock().unwrap().clone()
    }

    pub fn set_sleep_schedule(&self, schedule: SleepSchedule) -> CoreResult<SleepSchedule> {
        schedule.validate().map_err(CoreError::Validation)?;
        *self.sleep_schedule.lock().unwrap() = schedule.clone();
        info!(
            "Sleep window set to {}..{} {} (enabled: {})",
            schedule.start_hour, schedule.end_hour, schedule.timezone, schedule.enabled
        );
        Ok(schedule)
    }

    fn sleep_window_active(&self) -> bool {
        self.sleep_schedule.lock().unwrap().is_active_now()
    }

    // --- Cross-agent push throttle ---

    /// Per-agent budget for outbound push notifications: three per fixed
    /// one-hour window. In-app messages are never throttled here.
    pub fn should_send_message(&self, agent_id: &str, channel: AlertChannel) -> bool {
        if channel == AlertChannel::InApp {
            return true;
        }
        let now_ms = self.clock.now_ms();
        let mut windows = self.push_windows.lock().unwrap();
        match windows.get_mut(agent_id) {
            None => {
                windows.insert(
                    agent_id.to_string(),
                    PushWindow {
                        started_ms: now_ms,
                        count: 1,
                    },
                );
                true
            }
            Some(window) if now_ms.saturating_sub(window.started_ms) >= PUSH_WINDOW_MS => {
                window.started_ms = now_ms;
                window.count = 1;
                true
            }
            Some(window) if window.count >= PUSH_WINDOW_CAP => false,
            Some(window) => {
                window.count += 1;
                true
            }
        }
    }

    // --- Startup reconciliation ---

    /// Rebuild the process-local surveillance state after a restart: fresh
    /// idle monitors for working agents and a conservative re-evaluation of
    /// blocked tasks (duplicate notifications are accepted).
    pub async fn reconcile(self: &Arc<Self>) -> CoreResult<()> {
        let agents = self.store.list_agents(&AgentFilter::default()).await?;
        let mut monitors = 0;
        let mut reblocked = 0;

        for agent in &agents {
            if agent.status == AgentStatus::Working {
                self.arm_idle_monitor(&agent.id);
                monitors += 1;
            }
            for task in self
                .store
                .list_tasks_by_agent(&agent.id)
                .await?
                .into_iter()
                .filter(|t| t.status == TaskStatus::Blocked)
            {
                self.alerts
                    .process_event(AlertEvent {
                        trigger: AlertTrigger::Blocked,
                        agent_id: agent.id.clone(),
                        task_id: task.id.clone(),
                        title: task.title.clone(),
                        priority: task.priority,
                        reason: task.blocked_reason.clone(),
                        project_id: task.project_id.clone(),
                    })
                    .await;
                reblocked += 1;
            }
        }

        info!(
            "Reconciled {} agents: {monitors} idle monitors armed, {reblocked} blocked tasks re-evaluated",
            agents.len()
        );
        Ok(())
    }

    pub async fn shutdown(&self) {
        let mut timers = self.idle_timers.lock().unwrap();
        for (_, handle) in timers.drain() {
            handle.cancel();
        }
    }
}
