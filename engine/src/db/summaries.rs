/// Summary persistence operations
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use super::now_secs;

/// Summary record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub id: String,
    pub task_id: String,
    pub content: String,
    pub created_at: i64,
}

/// Summary repository for database operations
#[derive(Clone)]
pub struct SummaryRepository {
    pool: SqlitePool,
}

impl SummaryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, task_id: &str, content: &str) -> Result<Summary> {
        let now = now_secs()?;
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO summaries (id, task_id, content, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(task_id)
            .bind(content)
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Failed to create summary")?;

        Ok(Summary {
            id,
            task_id: task_id.to_string(),
            content: content.to_string(),
            created_at: now,
        })
    }

    /// Most recent summary of a task
    pub async fn find_latest(&self, task_id: &str) -> Result<Option<Summary>> {
        let row = sqlx::query(
            "SELECT id, task_id, content, created_at FROM summaries \
             WHERE task_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest summary")?;

        Ok(row.map(|r| Summary {
            id: r.get("id"),
            task_id: r.get("task_id"),
            content: r.get("content"),
            created_at: r.get("created_at"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, ModelDescriptor, NewTask};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_find_latest_returns_newest() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        let task = db
            .tasks()
            .create(NewTask::new("t", ModelDescriptor::new("openai", "m")))
            .await
            .unwrap();
        let repo = db.summaries();

        assert!(repo.find_latest(&task.id).await.unwrap().is_none());

        repo.create(&task.id, "first").await.unwrap();
        let second = repo.create(&task.id, "second").await.unwrap();

        let latest = repo.find_latest(&task.id).await.unwrap().unwrap();
        assert_eq!(latest, second);
    }
}
