mod throttle;

pub use throttle::{InAppAdmit, InAppCoalescer, PushBuckets};

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::core::bus::{EventBus, EventKind};
use crate::core::clock::{Clock, TimerHandle, TimerService};
use crate::core::store::Store;
use crate::core::store::types::{AlertChannel, AlertRule, AlertTrigger, MessageLinks, TaskPriority};

/// One lifecycle-derived alert. This struct is the engine's entire contract
/// with the rest of the system; the engine never calls back into the
/// lifecycle manager.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub trigger: AlertTrigger,
    pub agent_id: String,
    pub task_id: String,
    pub title: String,
    pub priority: TaskPriority,
    pub reason: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PendingKey {
    agent_id: String,
    task_id: String,
    trigger: AlertTrigger,
    rule_id: String,
}

struct CompletionBatch {
    timer: TimerHandle,
    entries: Vec<AlertEvent>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlertStats {
    /// Message rows written.
    pub delivered: u64,
    /// Deliveries absorbed by anti-spam without an individual row.
    pub suppressed: u64,
    /// Store write failures (logged, never propagated).
    pub failed: u64,
}

struct EngineState {
    pending: HashMap<PendingKey, TimerHandle>,
    batches: HashMap<String, CompletionBatch>,
    push: PushBuckets,
    inapp: InAppCoalescer,
    stats: AlertStats,
}

enum Delivery {
    Push,
    InApp,
    DigestOpened,
    Digested,
}

/// Converts [`AlertEvent`]s into Message rows under the rule table's timing,
/// batching, and per-channel throttling policies. Scheduled deliveries are
/// indexed by `(agent, task, trigger, rule)` so a state change can cancel
/// them before they fire.
pub struct AlertEngine {
    store: Arc<Store>,
    bus: Arc<EventBus>,
    timers: TimerService,
    clock: Clock,
    state: Mutex<EngineState>,
}

impl AlertEngine {
    pub fn new(
        store: Arc<Store>,
        bus: Arc<EventBus>,
        timers: TimerService,
        clock: Clock,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            timers,
            clock,
            state: Mutex::new(EngineState {
                pending: HashMap::new(),
                batches: HashMap::new(),
                push: PushBuckets::new(),
                inapp: InAppCoalescer::new(),
                stats: AlertStats::default(),
            }),
        })
    }

    /// Match the event against enabled rules and deliver, schedule, or batch
    /// per rule. Failures are logged and counted; they never propagate to the
    /// lifecycle call that produced the event.
    pub async fn process_event(self: &Arc<Self>, event: AlertEvent) {
        let rules = match self
            .store
            .alert_rules_for(event.trigger, event.priority)
            .await
        {
            Ok(rules) => rules,
            Err(e) => {
                warn!(
                    "alert rule lookup failed for {} on agent {}: {e}",
                    event.trigger.as_str(),
                    event.agent_id
                );
                self.state.lock().unwrap().stats.failed += 1;
                return;
            }
        };

        for rule in rules {
            if rule.delay_ms == 0 {
                self.deliver(&event, &rule).await;
            } else if event.trigger == AlertTrigger::Completed {
                self.enqueue_completion(event.clone(), rule);
            } else {
                self.schedule_delayed(event.clone(), rule);
            }
        }
    }

    fn schedule_delayed(self: &Arc<Self>, event: AlertEvent, rule: AlertRule) {
        let key = PendingKey {
            agent_id: event.agent_id.clone(),
            task_id: event.task_id.clone(),
            trigger: event.trigger,
            rule_id: rule.id.clone(),
        };
        let engine = Arc::clone(self);
        let fire_key = key.clone();
        let handle = self
            .timers
            .schedule(Duration::from_millis(rule.delay_ms), async move {
                engine.fire_scheduled(fire_key, event, rule).await;
            });

        let mut state = self.state.lock().unwrap();
        match state.pending.entry(key) {
            // A re-emitted event must not keep pushing the delivery out; the
            // earliest schedule stands.
            Entry::Occupied(_) => {
                handle.cancel();
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
            }
        }
    }

    async fn fire_scheduled(self: Arc<Self>, key: PendingKey, event: AlertEvent, rule: AlertRule) {
        self.state.lock().unwrap().pending.remove(&key);
        self.deliver(&event, &rule).await;
    }

    fn enqueue_completion(self: &Arc<Self>, event: AlertEvent, rule: AlertRule) {
        let mut state = self.state.lock().unwrap();
        match state.batches.entry(rule.id.clone()) {
            Entry::Occupied(mut slot) => slot.get_mut().entries.push(event),
            Entry::Vacant(slot) => {
                let engine = Arc::clone(self);
                let flush_rule = rule.clone();
                let timer = self
                    .timers
                    .schedule(Duration::from_millis(rule.delay_ms), async move {
                        engine.flush_batch(flush_rule).await;
                    });
                slot.insert(CompletionBatch {
                    timer,
                    entries: vec![event],
                });
            }
        }
    }

    async fn flush_batch(self: Arc<Self>, rule: AlertRule) {
        let entries = {
            let mut state = self.state.lock().unwrap();
            match state.batches.remove(&rule.id) {
                Some(batch) => batch.entries,
                None => return,
            }
        };
        if entries.is_empty() {
            // Everything in the window was cancelled by state changes.
            return;
        }

        let now = self.clock.now();
        let (content, links) = if entries.len() == 1 {
            let only = &entries[0];
            (
                render_content(only),
                MessageLinks {
                    todo_id: Some(only.task_id.clone()),
                    session_id: None,
                    project_id: only.project_id.clone(),
                },
            )
        } else {
            let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
            (
                format!("{} tasks completed: {}", entries.len(), titles.join(", ")),
                MessageLinks::default(),
            )
        };

        // The batch is already a coalesced delivery; it goes straight to the
        // channel without a second pass through the coalescer.
        let channel = {
            let mut state = self.state.lock().unwrap();
            match rule.channel {
                AlertChannel::Push | AlertChannel::Both => {
                    if state.push.try_acquire(&entries[0].agent_id, now) {
                        AlertChannel::Push
                    } else {
                        AlertChannel::InApp
                    }
                }
                AlertChannel::InApp => AlertChannel::InApp,
            }
        };
        self.write_message(
            AlertTrigger::Completed.as_str(),
            &content,
            &links,
            channel,
            &rule.id,
            &entries[0].agent_id,
        )
        .await;
    }

    async fn deliver(self: &Arc<Self>, event: &AlertEvent, rule: &AlertRule) {
        let now = self.clock.now();
        let line = format!("{}: {}", event.trigger.as_str(), event.title);

        let decision = {
            let mut state = self.state.lock().unwrap();
            let in_app = |state: &mut EngineState| match state.inapp.admit(
                &event.agent_id,
                now,
                line.clone(),
            ) {
                InAppAdmit::Deliver => Delivery::InApp,
                InAppAdmit::DigestOpened => Delivery::DigestOpened,
                InAppAdmit::Digested => Delivery::Digested,
            };
            match rule.channel {
                AlertChannel::Push | AlertChannel::Both => {
                    if state.push.try_acquire(&event.agent_id, now) {
                        Delivery::Push
                    } else {
                        // Push budget exhausted: downgrade to in-app.
                        in_app(&mut *state)
                    }
                }
                AlertChannel::InApp => in_app(&mut *state),
            }
        };

        let links = MessageLinks {
            todo_id: Some(event.task_id.clone()),
            session_id: None,
            project_id: event.project_id.clone(),
        };
        match decision {
            Delivery::Push => {
                self.write_message(
                    event.trigger.as_str(),
                    &render_content(event),
                    &links,
                    AlertChannel::Push,
                    &rule.id,
                    &event.agent_id,
                )
                .await;
            }
            Delivery::InApp => {
                self.write_message(
                    event.trigger.as_str(),
                    &render_content(event),
                    &links,
                    AlertChannel::InApp,
                    &rule.id,
                    &event.agent_id,
                )
                .await;
            }
            Delivery::DigestOpened => {
                self.state.lock().unwrap().stats.suppressed += 1;
                let engine = Arc::clone(self);
                let agent_id = event.agent_id.clone();
                // Not indexed for cancellation: the digest is channel-level
                // anti-spam, not a pending task alert.
                let _ = self.timers.schedule(Duration::from_secs(60), async move {
                    engine.flush_digest(agent_id).await;
                });
            }
            Delivery::Digested => {
                self.state.lock().unwrap().stats.suppressed += 1;
            }
        }
    }

    async fn flush_digest(self: Arc<Self>, agent_id: String) {
        let entries = self.state.lock().unwrap().inapp.take_digest(&agent_id);
        if entries.is_empty() {
            return;
        }
        let content = format!(
            "{} notifications for agent {} in the last minute: {}",
            entries.len(),
            agent_id,
            entries.join("; ")
        );
        self.write_message(
            "digest",
            &content,
            &MessageLinks::default(),
            AlertChannel::InApp,
            "digest",
            &agent_id,
        )
        .await;
    }

    async fn write_message(
        &self,
        kind: &str,
        content: &str,
        links: &MessageLinks,
        channel: AlertChannel,
        rule_id: &str,
        agent_id: &str,
    ) {
        let now = self.clock.now();
        match self.store.create_message(kind, content, links, now).await {
            Ok(id) => {
                self.bus.publish(
                    EventKind::MessageCreated,
                    json!({
                        "id": id,
                        "type": kind,
                        "channel": channel.as_str(),
                        "rule_id": rule_id,
                        "agent_id": agent_id,
                    }),
                );
                self.state.lock().unwrap().stats.delivered += 1;
                debug!("alert {kind} delivered via {} (rule {rule_id})", channel.as_str());
            }
            Err(e) => {
                warn!("failed to persist {kind} alert for agent {agent_id}: {e}");
                self.state.lock().unwrap().stats.failed += 1;
            }
        }
    }

    /// Cancel every scheduled alert for the agent (optionally narrowed to one
    /// task). Returns how many scheduled deliveries were cancelled; calling
    /// again returns 0.
    pub fn cancel_pending_alerts(&self, agent_id: &str, task_id: Option<&str>) -> usize {
        self.cancel_where(agent_id, task_id, None)
    }

    /// Cancel scheduled alerts of one trigger kind for `(agent, task)`.
    pub fn cancel_trigger(&self, agent_id: &str, task_id: &str, trigger: AlertTrigger) -> usize {
        self.cancel_where(agent_id, Some(task_id), Some(trigger))
    }

    fn cancel_where(
        &self,
        agent_id: &str,
        task_id: Option<&str>,
        trigger: Option<AlertTrigger>,
    ) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut cancelled = 0;

        state.pending.retain(|key, handle| {
            let matched = key.agent_id == agent_id
                && task_id.is_none_or(|t| key.task_id == t)
                && trigger.is_none_or(|tr| key.trigger == tr);
            if !matched {
                return true;
            }
            if handle.cancel() {
                cancelled += 1;
            }
            false
        });

        let batch_matches = trigger.is_none() || trigger == Some(AlertTrigger::Completed);
        if batch_matches {
            state.batches.retain(|_, batch| {
                let before = batch.entries.len();
                batch.entries.retain(|e| {
                    !(e.agent_id == agent_id && task_id.is_none_or(|t| e.task_id == t))
                });
                cancelled += before - batch.entries.len();
                if batch.entries.is_empty() {
                    batch.timer.cancel();
                    false
                } else {
                    true
                }
            });
        }

        cancelled
    }

    pub fn stats(&self) -> AlertStats {
        self.state.lock().unwrap().stats
    }
}

fn render_content(event: &AlertEvent) -> String {
    let reason = event.reason.as_deref().unwrap_or("no reason given");
    match event.trigger {
        AlertTrigger::Blocked => format!(
            "Agent {} blocked on \"{}\": {}",
            event.agent_id, event.title, reason
        ),
        AlertTrigger::Error => format!(
            "Agent {} reported errors on \"{}\": {}",
            event.agent_id, event.title, reason
        ),
        AlertTrigger::Completed => {
            format!("Task \"{}\" completed by agent {}", event.title, event.agent_id)
        }
        AlertTrigger::IdleTooLong => format!(
            "Agent {} is idle with pending work: \"{}\"",
            event.agent_id, event.title
        ),
        AlertTrigger::StaleTask => format!(
            "Task \"{}\" for agent {} has gone stale",
            event.title, event.agent_id
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::open_test_store;
    use crate::core::store::types::MessageFilter;
    use tokio::sync::broadcast::Receiver;

    use crate::core::bus::DashboardEvent;

    async fn engine_fixture() -> (
        tempfile::TempDir,
        Arc<Store>,
        Arc<AlertEngine>,
        Receiver<DashboardEvent>,
    ) {
        let (dir, store) = open_test_store();
        let store = Arc::new(store);
        store.seed_default_alert_rules().await.unwrap();
        let clock = Clock::new();
        let bus = Arc::new(EventBus::new(clock.clone()));
        let rx = bus.subscribe();
        let engine = AlertEngine::new(store.clone(), bus, TimerService::new(), clock);
        (dir, store, engine, rx)
    }

    fn event(trigger: AlertTrigger, priority: TaskPriority, task: &str) -> AlertEvent {
        AlertEvent {
            trigger,
            agent_id: "a1".into(),
            task_id: task.into(),
            title: format!("work on {task}"),
            priority,
            reason: Some("needs input".into()),
            project_id: None,
        }
    }

    async fn message_count(store: &Store) -> usize {
        store
            .list_messages(&MessageFilter::default())
            .await
            .unwrap()
            .len()
    }

    #[tokio::test(start_paused = true)]
    async fn high_priority_block_delivers_immediately() {
        let (_dir, store, engine, mut rx) = engine_fixture().await;
        engine
            .process_event(event(AlertTrigger::Blocked, TaskPriority::High, "t1"))
            .await;

        let messages = store.list_messages(&MessageFilter::default()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, "blocked");
        assert!(messages[0].content.contains("needs input"));

        let bus_event = rx.recv().await.unwrap();
        assert_eq!(bus_event.kind, EventKind::MessageCreated);
        assert_eq!(bus_event.payload["rule_id"], "blocked-high");
    }

    #[tokio::test(start_paused = true)]
    async fn medium_block_waits_out_its_delay() {
        let (_dir, store, engine, _rx) = engine_fixture().await;
        engine
            .process_event(event(AlertTrigger::Blocked, TaskPriority::Medium, "t1"))
            .await;
        assert_eq!(message_count(&store).await, 0);

        tokio::time::sleep(Duration::from_secs(601)).await;
        assert_eq!(message_count(&store).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_a_delayed_alert_and_is_idempotent() {
        let (_dir, store, engine, _rx) = engine_fixture().await;
        engine
            .process_event(event(AlertTrigger::Blocked, TaskPriority::Medium, "t1"))
            .await;

        assert_eq!(engine.cancel_pending_alerts("a1", Some("t1")), 1);
        assert_eq!(engine.cancel_pending_alerts("a1", Some("t1")), 0);

        tokio::time::sleep(Duration::from_secs(700)).await;
        assert_eq!(message_count(&store).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn completions_batch_into_one_message() {
        let (_dir, store, engine, _rx) = engine_fixture().await;
        engine
            .process_event(event(AlertTrigger::Completed, TaskPriority::Medium, "t1"))
            .await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        engine
            .process_event(event(AlertTrigger::Completed, TaskPriority::Medium, "t2"))
            .await;

        tokio::time::sleep(Duration::from_secs(901)).await;
        let messages = store.list_messages(&MessageFilter::default()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.starts_with("2 tasks completed"));
    }

    #[tokio::test(start_paused = true)]
    async fn single_event_batch_still_produces_one_message() {
        let (_dir, store, engine, _rx) = engine_fixture().await;
        engine
            .process_event(event(AlertTrigger::Completed, TaskPriority::Low, "t1"))
            .await;

        tokio::time::sleep(Duration::from_secs(901)).await;
        let messages = store.list_messages(&MessageFilter::default()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("completed by agent a1"));
    }

    #[tokio::test(start_paused = true)]
    async fn block_cancels_pending_completion_batch_entry() {
        let (_dir, store, engine, _rx) = engine_fixture().await;
        engine
            .process_event(event(AlertTrigger::Completed, TaskPriority::Medium, "t1"))
            .await;

        assert_eq!(
            engine.cancel_trigger("a1", "t1", AlertTrigger::Completed),
            1
        );
        tokio::time::sleep(Duration::from_secs(901)).await;
        assert_eq!(message_count(&store).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn push_overflow_downgrades_to_in_app() {
        let (_dir, store, engine, mut rx) = engine_fixture().await;
        // error-all delivers immediately on the push channel (rule says both).
        for i in 0..4 {
            engine
                .process_event(event(AlertTrigger::Error, TaskPriority::High, &format!("t{i}")))
                .await;
        }

        // All four produce rows; only three may ride the push channel.
        assert_eq!(message_count(&store).await, 4);
        let mut push = 0;
        let mut in_app = 0;
        for _ in 0..4 {
            let ev = rx.recv().await.unwrap();
            match ev.payload["channel"].as_str().unwrap() {
                "push" => push += 1,
                "in_app" => in_app += 1,
                other => panic!("unexpected channel {other}"),
            }
        }
        assert_eq!(push, 3);
        assert_eq!(in_app, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_digest() {
        let (_dir, store, engine, _rx) = engine_fixture().await;
        // completed-high is in_app with no delay; fire 8 for one agent.
        for i in 0..8 {
            engine
                .process_event(event(AlertTrigger::Completed, TaskPriority::High, &format!("t{i}")))
                .await;
        }

        // Five individual rows, the rest digested.
        assert_eq!(message_count(&store).await, 5);
        assert_eq!(engine.stats().suppressed, 3);

        tokio::time::sleep(Duration::from_secs(61)).await;
        let messages = store.list_messages(&MessageFilter::default()).await.unwrap();
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].kind, "digest");
        assert!(messages[0].content.starts_with("3 notifications"));
    }
}
