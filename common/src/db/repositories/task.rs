// Task repository implementation

use super::queries::task_queries;
use crate::db::DbPool;
use crate::errors::{DatabaseError, StorageError};
use crate::models::{NewTask, Task, TaskId, TaskStatus};
use crate::store::{TaskEvent, TaskEventSender, TaskStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

/// Repository for task-related database operations
pub struct TaskRepository {
    pool: DbPool,
    events: Option<TaskEventSender>,
}

impl TaskRepository {
    /// Create a new TaskRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool, events: None }
    }

    /// Emit `TaskEvent::Created` on `events` after every successful insert
    pub fn with_events(mut self, events: TaskEventSender) -> Self {
        self.events = Some(events);
        self
    }
}

#[async_trait]
impl TaskStore for TaskRepository {
    #[instrument(skip(self))]
    async fn list_active(&self) -> Result<Vec<Task>, StorageError> {
        let tasks = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks WHERE status = 'ACTIVE' ORDER BY created_at DESC",
            task_queries::SELECT_ALL_COLUMNS
        ))
        .fetch_all(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        tracing::debug!(count = tasks.len(), "Loaded active tasks");
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn get_by_group(&self, group_id: &str) -> Result<Vec<Task>, StorageError> {
        let tasks = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks WHERE group_id = $1 AND status = 'ACTIVE' ORDER BY created_at DESC",
            task_queries::SELECT_ALL_COLUMNS
        ))
        .bind(group_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn get(&self, task_id: TaskId) -> Result<Option<Task>, StorageError> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks WHERE id = $1",
            task_queries::SELECT_ALL_COLUMNS
        ))
        .bind(task_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        Ok(task)
    }

    #[instrument(skip(self, new_task), fields(task_name = %new_task.name))]
    async fn create(&self, new_task: NewTask) -> Result<Task, StorageError> {
        let task = sqlx::query_as::<_, Task>(&format!(
            r#"
            INSERT INTO tasks (
                name, description, kind, cron_expr, deadline_time,
                advance_minutes, group_id, creator_id, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            task_queries::SELECT_ALL_COLUMNS
        ))
        .bind(&new_task.name)
        .bind(&new_task.description)
        .bind(new_task.kind.to_string())
        .bind(&new_task.cron_expr)
        .bind(new_task.deadline_time)
        .bind(new_task.advance_minutes)
        .bind(&new_task.group_id)
        .bind(&new_task.creator_id)
        .bind(TaskStatus::Active.to_string())
        .fetch_one(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        tracing::info!(task_id = task.id, task_name = %task.name, kind = %task.kind, "Task created");

        if let Some(events) = &self.events {
            events
                .send(TaskEvent::Created(task.clone()))
                .map_err(|e| StorageError::EventChannelClosed(e.to_string()))?;
        }

        Ok(task)
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE tasks SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(task_id)
            .bind(status.to_string())
            .execute(self.pool.pool())
            .await
            .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("Task not found: {}", task_id)));
        }

        tracing::info!(task_id, status = %status, "Task status updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_run_bookkeeping(
        &self,
        task_id: TaskId,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let result =
            sqlx::query("UPDATE tasks SET last_run_at = $2, next_run_at = $3 WHERE id = $1")
                .bind(task_id)
                .bind(last_run)
                .bind(next_run)
                .execute(self.pool.pool())
                .await
                .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("Task not found: {}", task_id)));
        }

        Ok(())
    }
}
