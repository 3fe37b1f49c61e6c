/// Task persistence operations
///
/// Tasks carry their plan as a JSON array and the plan cursor as an integer.
/// Partial updates only touch the columns they name.
use anyhow::{Context, Result};
use sdk::errors::EngineError;
use sdk::types::Role;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::fmt;
use std::str::FromStr;

use super::now_secs;

/// Task status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    NeedsHelp,
    NeedsReview,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::NeedsHelp => "NEEDS_HELP",
            TaskStatus::NeedsReview => "NEEDS_REVIEW",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Failed => "FAILED",
        }
    }

    /// Completed, cancelled and failed tasks never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "PENDING" => TaskStatus::Pending,
            "RUNNING" => TaskStatus::Running,
            "NEEDS_HELP" => TaskStatus::NeedsHelp,
            "NEEDS_REVIEW" => TaskStatus::NeedsReview,
            "COMPLETED" => TaskStatus::Completed,
            "CANCELLED" => TaskStatus::Cancelled,
            "FAILED" => TaskStatus::Failed,
            other => anyhow::bail!("unknown task status: {}", other),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Medium => "MEDIUM",
            TaskPriority::High => "HIGH",
            TaskPriority::Urgent => "URGENT",
        }
    }
}

impl FromStr for TaskPriority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "LOW" => TaskPriority::Low,
            "MEDIUM" => TaskPriority::Medium,
            "HIGH" => TaskPriority::High,
            "URGENT" => TaskPriority::Urgent,
            other => anyhow::bail!("unknown task priority: {}", other),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Immediate,
    Scheduled,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Immediate => "IMMEDIATE",
            TaskType::Scheduled => "SCHEDULED",
        }
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "IMMEDIATE" => TaskType::Immediate,
            "SCHEDULED" => TaskType::Scheduled,
            other => anyhow::bail!("unknown task type: {}", other),
        })
    }
}

/// Who is driving the desktop
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Control {
    Assistant,
    User,
}

impl Control {
    pub fn as_str(&self) -> &'static str {
        match self {
            Control::Assistant => "ASSISTANT",
            Control::User => "USER",
        }
    }
}

impl FromStr for Control {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "ASSISTANT" => Control::Assistant,
            "USER" => Control::User,
            other => anyhow::bail!("unknown control: {}", other),
        })
    }
}

/// Which provider and model a task runs on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Provider key, e.g. "anthropic"
    pub provider: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u64>,
}

impl ModelDescriptor {
    pub fn new(provider: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            name: name.into(),
            context_window: None,
        }
    }

    pub fn with_context_window(mut self, context_window: u64) -> Self {
        self.context_window = Some(context_window);
        self
    }
}

/// Task record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub control: Control,
    pub created_by: Role,
    pub model: ModelDescriptor,
    /// Absent until the planner has run
    pub plan: Option<Vec<String>>,
    pub plan_step: usize,
    pub scheduled_for: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Task {
    /// Plan steps, empty when unplanned
    pub fn plan_steps(&self) -> &[String] {
        self.plan.as_deref().unwrap_or(&[])
    }

    /// The step the cursor points at, if any remain
    pub fn current_step(&self) -> Option<&str> {
        self.plan_steps().get(self.plan_step).map(String::as_str)
    }
}

/// Fields for a new task
#[derive(Debug, Clone)]
pub struct NewTask {
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub created_by: Role,
    pub model: ModelDescriptor,
    pub scheduled_for: Option<i64>,
}

impl NewTask {
    /// A pending, immediate, medium priority task created by the user
    pub fn new(description: impl Into<String>, model: ModelDescriptor) -> Self {
        Self {
            description: description.into(),
            task_type: TaskType::Immediate,
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            created_by: Role::User,
            model,
            scheduled_for: None,
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn created_by(mut self, role: Role) -> Self {
        self.created_by = role;
        self
    }
}

/// Partial update of a task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub plan: Option<Vec<String>>,
    pub plan_step: Option<usize>,
    pub completed_at: Option<i64>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn plan(plan: Vec<String>) -> Self {
        Self {
            plan: Some(plan),
            ..Self::default()
        }
    }

    pub fn plan_step(step: usize) -> Self {
        Self {
            plan_step: Some(step),
            ..Self::default()
        }
    }

    pub fn completed_at(mut self, at: i64) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

const TASK_COLUMNS: &str = "id, description, task_type, status, priority, control, created_by, \
     model, plan, plan_step, scheduled_for, created_at, updated_at, completed_at";

/// Task repository for database operations
#[derive(Clone)]
pub struct TaskRepository {
    pool: SqlitePool,
}

impl TaskRepository {
    /// Create a new task repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a task with a fresh id
    pub async fn create(&self, new_task: NewTask) -> Result<Task> {
        let now = now_secs()?;
        let id = uuid::Uuid::new_v4().to_string();
        let model_json =
            serde_json::to_string(&new_task.model).context("Failed to encode model descriptor")?;

        sqlx::query(
            "INSERT INTO tasks (id, description, task_type, status, priority, control, created_by, \
             model, plan, plan_step, scheduled_for, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, 0, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new_task.description)
        .bind(new_task.task_type.as_str())
        .bind(new_task.status.as_str())
        .bind(new_task.priority.as_str())
        .bind(Control::Assistant.as_str())
        .bind(new_task.created_by.as_str())
        .bind(&model_json)
        .bind(new_task.scheduled_for)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create task")?;

        Ok(Task {
            id,
            description: new_task.description,
            task_type: new_task.task_type,
            status: new_task.status,
            priority: new_task.priority,
            control: Control::Assistant,
            created_by: new_task.created_by,
            model: new_task.model,
            plan: None,
            plan_step: 0,
            scheduled_for: new_task.scheduled_for,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    /// Get a task by ID
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS))
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch task")?;

        row.as_ref().map(row_to_task).transpose()
    }

    /// Get a task by ID, failing with `TaskNotFound` when absent
    pub async fn find_by_id(&self, task_id: &str) -> Result<Task> {
        self.get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()).into())
    }

    /// Apply a partial update and return the stored task
    pub async fn update(&self, task_id: &str, update: TaskUpdate) -> Result<Task> {
        let now = now_secs()?;

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE tasks SET updated_at = ");
        query.push_bind(now);

        if let Some(status) = update.status {
            query.push(", status = ").push_bind(status.as_str());
        }
        if let Some(plan) = &update.plan {
            let plan_json = serde_json::to_string(plan).context("Failed to encode plan")?;
            query.push(", plan = ").push_bind(plan_json);
        }
        if let Some(step) = update.plan_step {
            query.push(", plan_step = ").push_bind(step as i64);
        }
        if let Some(completed_at) = update.completed_at {
            query.push(", completed_at = ").push_bind(completed_at);
        }

        query.push(" WHERE id = ").push_bind(task_id.to_string());

        let result = query
            .build()
            .execute(&self.pool)
            .await
            .context("Failed to update task")?;

        if result.rows_affected() == 0 {
            return Err(EngineError::TaskNotFound(task_id.to_string()).into());
        }

        self.find_by_id(task_id).await
    }

    /// Get recent tasks (newest first)
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks ORDER BY created_at DESC, rowid DESC LIMIT ?",
            TASK_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent tasks")?;

        rows.iter().map(row_to_task).collect()
    }
}

fn row_to_task(r: &SqliteRow) -> Result<Task> {
    let model_json: String = r.get("model");
    let plan_json: Option<String> = r.get("plan");
    let created_by: String = r.get("created_by");

    Ok(Task {
        id: r.get("id"),
        description: r.get("description"),
        task_type: r.get::<String, _>("task_type").parse()?,
        status: r.get::<String, _>("status").parse()?,
        priority: r.get::<String, _>("priority").parse()?,
        control: r.get::<String, _>("control").parse()?,
        created_by: created_by.parse().map_err(anyhow::Error::msg)?,
        model: serde_json::from_str(&model_json).context("Corrupt model descriptor")?,
        plan: plan_json
            .map(|p| serde_json::from_str(&p))
            .transpose()
            .context("Corrupt plan")?,
        plan_step: r.get::<i64, _>("plan_step") as usize,
        scheduled_for: r.get("scheduled_for"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        completed_at: r.get("completed_at"),
    })
}
