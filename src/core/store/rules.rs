use rusqlite::params;

use super::types::*;
use super::{RULE_COLS, Store, rule_from_row};
use crate::core::error::{CoreError, CoreResult};

/// The seeded notification policy. Completion batching covers medium and low
/// priority together; the rule schema carries a single filter value, so that
/// policy is seeded as two rows sharing the batch delay.
const DEFAULT_RULES: &[(&str, AlertTrigger, PriorityFilter, u64, AlertChannel)] = &[
    ("blocked-high", AlertTrigger::Blocked, PriorityFilter::High, 0, AlertChannel::Both),
    ("blocked-medium", AlertTrigger::Blocked, PriorityFilter::Medium, 600_000, AlertChannel::Both),
    ("blocked-low", AlertTrigger::Blocked, PriorityFilter::Low, 3_600_000, AlertChannel::InApp),
    ("error-all", AlertTrigger::Error, PriorityFilter::All, 0, AlertChannel::Both),
    ("completed-high", AlertTrigger::Completed, PriorityFilter::High, 0, AlertChannel::InApp),
    ("completed-batch-medium", AlertTrigger::Completed, PriorityFilter::Medium, 900_000, AlertChannel::InApp),
    ("completed-batch-low", AlertTrigger::Completed, PriorityFilter::Low, 900_000, AlertChannel::InApp),
    ("idle-all", AlertTrigger::IdleTooLong, PriorityFilter::All, 1_800_000, AlertChannel::InApp),
    ("stale-all", AlertTrigger::StaleTask, PriorityFilter::All, 7_200_000, AlertChannel::Push),
];

impl Store {
    /// Idempotent: existing rows (including operator-edited ones) are left
    /// alone.
    pub async fn seed_default_alert_rules(&self) -> CoreResult<usize> {
        let conn = self.conn().lock().await;
        let mut seeded = 0;
        for (id, trigger, filter, delay_ms, channel) in DEFAULT_RULES {
            seeded += conn.execute(
                r#"INSERT OR IGNORE INTO alert_rules (id, "trigger", priority_filter, delay_ms, channel, enabled)
                   VALUES (?1, ?2, ?3, ?4, ?5, 1)"#,
                params![
                    id,
                    trigger.as_str(),
                    filter.as_str(),
                    *delay_ms as i64,
                    channel.as_str()
                ],
            )?;
        }
        Ok(seeded)
    }

    pub async fn list_alert_rules(&self) -> CoreResult<Vec<AlertRule>> {
        let conn = self.conn().lock().await;
        let mut stmt = conn.prepare(&format!("SELECT {RULE_COLS} FROM alert_rules ORDER BY id"))?;
        let rows = stmt.query_map([], rule_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Enabled rules whose trigger matches and whose filter admits `priority`.
    pub async fn alert_rules_for(
        &self,
        trigger: AlertTrigger,
        priority: TaskPriority,
    ) -> CoreResult<Vec<AlertRule>> {
        super::retry_read(|| self.alert_rules_for_once(trigger, priority)).await
    }

    async fn alert_rules_for_once(
        &self,
        trigger: AlertTrigger,
        priority: TaskPriority,
    ) -> CoreResult<Vec<AlertRule>> {
        let conn = self.conn().lock().await;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT {RULE_COLS} FROM alert_rules
               WHERE "trigger" = ?1 AND enabled = 1 AND priority_filter IN ('all', ?2)
               ORDER BY id"#
        ))?;
        let rows = stmt.query_map(params![trigger.as_str(), priority.as_str()], rule_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub async fn create_alert_rule(&self, rule: &AlertRule) -> CoreResult<AlertRule> {
        let conn = self.conn().lock().await;
        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO alert_rules (id, "trigger", priority_filter, delay_ms, channel, enabled)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                rule.id,
                rule.trigger.as_str(),
                rule.priority_filter.as_str(),
                rule.delay_ms as i64,
                rule.channel.as_str(),
                rule.enabled as i64
            ],
        )?;
        if inserted == 0 {
            return Err(CoreError::conflict(format!("alert rule {} already exists", rule.id)));
        }
        Ok(rule.clone())
    }

    pub async fn update_alert_rule(
        &self,
        id: &str,
        delay_ms: Option<u64>,
        channel: Option<AlertChannel>,
        enabled: Option<bool>,
    ) -> CoreResult<AlertRule> {
        let conn = self.conn().lock().await;
        let updated = conn.execute(
            "UPDATE alert_rules SET
                delay_ms = COALESCE(?2, delay_ms),
                channel = COALESCE(?3, channel),
                enabled = COALESCE(?4, enabled)
             WHERE id = ?1",
            params![
                id,
                delay_ms.map(|v| v as i64),
                channel.map(|c| c.as_str()),
                enabled.map(|e| e as i64)
            ],
        )?;
        if updated == 0 {
            return Err(CoreError::not_found(format!("alert rule {id}")));
        }
        let rule = conn.query_row(
            &format!("SELECT {RULE_COLS} FROM alert_rules WHERE id = ?1"),
            params![id],
            rule_from_row,
        )?;
        Ok(rule)
    }

    pub async fn delete_alert_rule(&self, id: &str) -> CoreResult<bool> {
        let conn = self.conn().lock().await;
        let removed = conn.execute("DELETE FROM alert_rules WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::open_test_store;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let (_dir, store) = open_test_store();
        assert_eq!(store.seed_default_alert_rules().await.unwrap(), 9);
        assert_eq!(store.seed_default_alert_rules().await.unwrap(), 0);
        assert_eq!(store.list_alert_rules().await.unwrap().len(), 9);
    }

    #[tokio::test]
    async fn seeding_preserves_operator_edits() {
        let (_dir, store) = open_test_store();
        store.seed_default_alert_rules().await.unwrap();
        store
            .update_alert_rule("blocked-high", Some(5_000), None, None)
            .await
            .unwrap();

        store.seed_default_alert_rules().await.unwrap();
        let rules = store
            .alert_rules_for(AlertTrigger::Blocked, TaskPriority::High)
            .await
            .unwrap();
        let edited = rules.iter().find(|r| r.id == "blocked-high").unwrap();
        assert_eq!(edited.delay_ms, 5_000);
    }

    #[tokio::test]
    async fn matching_honours_trigger_filter_and_enabled_flag() {
        let (_dir, store) = open_test_store();
        store.seed_default_alert_rules().await.unwrap();

        // High-priority block matches the high rule and nothing delayed.
        let rules = store
            .alert_rules_for(AlertTrigger::Blocked, TaskPriority::High)
            .await
            .unwrap();
        assert_eq!(rules.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["blocked-high"]);

        // error-all admits every priority.
        let rules = store
            .alert_rules_for(AlertTrigger::Error, TaskPriority::Low)
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "error-all");

        // Disabled rules drop out of matching.
        store
            .update_alert_rule("error-all", None, None, Some(false))
            .await
            .unwrap();
        assert!(store
            .alert_rules_for(AlertTrigger::Error, TaskPriority::Low)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn completed_medium_and_low_share_the_batch_delay() {
        let (_dir, store) = open_test_store();
        store.seed_default_alert_rules().await.unwrap();

        for priority in [TaskPriority::Medium, TaskPriority::Low] {
            let rules = store
                .alert_rules_for(AlertTrigger::Completed, priority)
                .await
                .unwrap();
            assert_eq!(rules.len(), 1);
            assert_eq!(rules[0].delay_ms, 900_000);
            assert_eq!(rules[0].channel, AlertChannel::InApp);
        }
    }
}
