/// Message persistence operations
///
/// Messages are append-only. The only mutation is attaching a summary id
/// once a summary has absorbed them.
use anyhow::{Context, Result};
use sdk::types::{ContentBlock, Role};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::now_secs;

/// Message record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub task_id: String,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub summary_id: Option<String>,
    pub created_at: i64,
}

/// Message repository for database operations
#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a message to a task's log
    pub async fn create(
        &self,
        task_id: &str,
        role: Role,
        content: Vec<ContentBlock>,
    ) -> Result<StoredMessage> {
        let now = now_secs()?;
        let id = uuid::Uuid::new_v4().to_string();
        let content_json =
            serde_json::to_string(&content).context("Failed to encode message content")?;

        sqlx::query(
            "INSERT INTO messages (id, task_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(task_id)
        .bind(role.as_str())
        .bind(&content_json)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create message")?;

        Ok(StoredMessage {
            id,
            task_id: task_id.to_string(),
            role,
            content,
            summary_id: None,
            created_at: now,
        })
    }

    /// Every message of a task in chronological order
    pub async fn find_every(&self, task_id: &str) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, task_id, role, content, summary_id, created_at FROM messages \
             WHERE task_id = ? ORDER BY seq ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch messages")?;

        rows.iter().map(row_to_message).collect()
    }

    /// Messages not yet absorbed into a summary, chronological
    pub async fn find_unsummarized(&self, task_id: &str) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, task_id, role, content, summary_id, created_at FROM messages \
             WHERE task_id = ? AND summary_id IS NULL ORDER BY seq ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch unsummarized messages")?;

        rows.iter().map(row_to_message).collect()
    }

    /// The earliest USER message, which carries the task instructions
    pub async fn find_first_user(&self, task_id: &str) -> Result<Option<StoredMessage>> {
        let row = sqlx::query(
            "SELECT id, task_id, role, content, summary_id, created_at FROM messages \
             WHERE task_id = ? AND role = 'USER' ORDER BY seq ASC LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch first user message")?;

        row.as_ref().map(row_to_message).transpose()
    }

    /// Link messages to a summary. Returns the number of rows changed.
    pub async fn attach_summary(&self, summary_id: &str, message_ids: &[String]) -> Result<u64> {
        if message_ids.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE messages SET summary_id = ");
        query.push_bind(summary_id.to_string());
        query.push(" WHERE id IN (");
        let mut ids = query.separated(", ");
        for id in message_ids {
            ids.push_bind(id.clone());
        }
        ids.push_unseparated(")");

        let result = query
            .build()
            .execute(&self.pool)
            .await
            .context("Failed to attach summary")?;

        Ok(result.rows_affected())
    }
}

fn row_to_message(r: &SqliteRow) -> Result<StoredMessage> {
    let content_json: String = r.get("content");
    let role: String = r.get("role");

    Ok(StoredMessage {
        id: r.get("id"),
        task_id: r.get("task_id"),
        role: role.parse().map_err(anyhow::Error::msg)?,
        content: serde_json::from_str(&content_json).context("Corrupt message content")?,
        summary_id: r.get("summary_id"),
        created_at: r.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, ModelDescriptor, NewTask};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Database, String) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        let task = db
            .tasks()
            .create(NewTask::new("t", ModelDescriptor::new("anthropic", "m")))
            .await
            .unwrap();
        (temp_dir, db, task.id)
    }

    #[tokio::test]
    async fn test_messages_keep_insertion_order() {
        let (_dir, db, task_id) = setup().await;
        let repo = db.messages();

        for i in 0..5 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            repo.create(&task_id, role, vec![ContentBlock::text(format!("m{}", i))])
                .await
                .unwrap();
        }

        let all = repo.find_every(&task_id).await.unwrap();
        let texts: Vec<_> = all
            .iter()
            .map(|m| m.content[0].as_text().unwrap().to_string())
            .collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);
        assert_eq!(all[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_content_blocks_round_trip() {
        let (_dir, db, task_id) = setup().await;
        let repo = db.messages();

        let blocks = vec![
            ContentBlock::text("clicking"),
            ContentBlock::ToolUse {
                id: "tu_1".into(),
                name: "computer_screenshot".into(),
                input: serde_json::json!({}),
            },
        ];
        repo.create(&task_id, Role::Assistant, blocks.clone())
            .await
            .unwrap();

        let stored = repo.find_every(&task_id).await.unwrap();
        assert_eq!(stored[0].content, blocks);
    }

    #[tokio::test]
    async fn test_find_first_user() {
        let (_dir, db, task_id) = setup().await;
        let repo = db.messages();

        assert!(repo.find_first_user(&task_id).await.unwrap().is_none());

        repo.create(&task_id, Role::Assistant, vec![ContentBlock::text("hi")])
            .await
            .unwrap();
        let first = repo
            .create(&task_id, Role::User, vec![ContentBlock::text("do it")])
            .await
            .unwrap();
        repo.create(&task_id, Role::User, vec![ContentBlock::text("later")])
            .await
            .unwrap();

        let found = repo.find_first_user(&task_id).await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn test_attach_summary_excludes_from_unsummarized() {
        let (_dir, db, task_id) = setup().await;
        let repo = db.messages();

        let a = repo
            .create(&task_id, Role::User, vec![ContentBlock::text("a")])
            .await
            .unwrap();
        let b = repo
            .create(&task_id, Role::Assistant, vec![ContentBlock::text("b")])
            .await
            .unwrap();

        let summary = db.summaries().create(&task_id, "a then b").await.unwrap();
        let changed = repo
            .attach_summary(&summary.id, &[a.id.clone(), b.id.clone()])
            .await
            .unwrap();
        assert_eq!(changed, 2);

        let c = repo
            .create(&task_id, Role::User, vec![ContentBlock::text("c")])
            .await
            .unwrap();

        let unsummarized = repo.find_unsummarized(&task_id).await.unwrap();
        assert_eq!(unsummarized.len(), 1);
        assert_eq!(unsummarized[0].id, c.id);

        let every = repo.find_every(&task_id).await.unwrap();
        assert_eq!(every.len(), 3);
        assert_eq!(every[0].summary_id.as_deref(), Some(summary.id.as_str()));
    }

    #[tokio::test]
    async fn test_attach_summary_with_no_ids() {
        let (_dir, db, _task_id) = setup().await;
        assert_eq!(db.messages().attach_summary("s", &[]).await.unwrap(), 0);
    }
}
