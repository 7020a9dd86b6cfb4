use rusqlite::params;

use super::types::*;
use super::Store;
use crate::core::error::{CoreError, CoreResult};

const MESSAGE_COLS: &str = "id, type, content, todo_id, session_id, project_id, read, created_at";

impl Store {
    /// Append a notification row. The content is encrypted before it touches
    /// disk; callers only ever see plaintext.
    pub async fn create_message(
        &self,
        kind: &str,
        content: &str,
        links: &MessageLinks,
        now: u64,
    ) -> CoreResult<i64> {
        let sealed = self.crypto().encrypt(content)?;
        let conn = self.conn().lock().await;
        conn.execute(
            "INSERT INTO messages (type, content, todo_id, session_id, project_id, read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                kind,
                sealed,
                links.todo_id,
                links.session_id,
                links.project_id,
                now as i64
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn list_messages(&self, filter: &MessageFilter) -> CoreResult<Vec<Message>> {
        let limit = filter.limit.unwrap_or(100).min(1000);
        let mut sql = format!("SELECT {MESSAGE_COLS} FROM messages");
        if filter.unread == Some(true) {
            sql.push_str(" WHERE read = 0");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");

        let conn = self.conn().lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (id, kind, sealed, todo_id, session_id, project_id, read, created_at) = row?;
            results.push(Message {
                id,
                kind,
                content: self.crypto().decrypt(&sealed)?,
                todo_id,
                session_id,
                project_id,
                read: read != 0,
                created_at: created_at as u64,
            });
        }
        Ok(results)
    }

    pub async fn mark_message_read(&self, id: i64) -> CoreResult<bool> {
        let conn = self.conn().lock().await;
        let updated = conn.execute("UPDATE messages SET read = 1 WHERE id = ?1", params![id])?;
        if updated == 0 {
            return Err(CoreError::not_found(format!("message {id}")));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::open_test_store;

    #[tokio::test]
    async fn content_is_encrypted_at_rest_and_decrypted_on_read() {
        let (_dir, store) = open_test_store();
        let id = store
            .create_message(
                "blocked",
                "agent a1 blocked on T1",
                &MessageLinks {
                    todo_id: Some("T1".into()),
                    ..Default::default()
                },
                100,
            )
            .await
            .unwrap();
        assert!(id > 0);

        // The raw row must not contain the plaintext.
        let raw: String = store
            .conn()
            .lock()
            .await
            .query_row("SELECT content FROM messages WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .unwrap();
        assert!(!raw.contains("blocked on T1"));

        let messages = store.list_messages(&MessageFilter::default()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "agent a1 blocked on T1");
        assert_eq!(messages[0].todo_id.as_deref(), Some("T1"));
        assert!(!messages[0].read);
    }

    #[tokio::test]
    async fn unread_filter_and_mark_read() {
        let (_dir, store) = open_test_store();
        let links = MessageLinks::default();
        let first = store.create_message("completed", "one", &links, 1).await.unwrap();
        store.create_message("completed", "two", &links, 2).await.unwrap();

        store.mark_message_read(first).await.unwrap();

        let unread = store
            .list_messages(&MessageFilter {
                unread: Some(true),
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].content, "two");

        assert!(matches!(
            store.mark_message_read(9999).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn newest_messages_come_first() {
        let (_dir, store) = open_test_store();
        let links = MessageLinks::default();
        for (i, t) in [(1, 10), (2, 20), (3, 30)] {
            store
                .create_message("completed", &format!("m{i}"), &links, t)
                .await
                .unwrap();
        }
        let messages = store
            .list_messages(&MessageFilter {
                unread: None,
                limit: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "m3");
        assert_eq!(messages[1].content, "m2");
    }
}
