// Reminder firing audit repository implementation

use crate::db::DbPool;
use crate::errors::{DatabaseError, StorageError};
use crate::models::{ReminderFiring, TaskId};
use crate::store::FiringStore;
use async_trait::async_trait;
use tracing::instrument;

/// Append-only writer for the `reminder_logs` audit table
pub struct FiringRepository {
    pool: DbPool,
}

impl FiringRepository {
    /// Create a new FiringRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Number of audited firings for a task
    #[instrument(skip(self))]
    pub async fn count_for_task(&self, task_id: TaskId) -> Result<i64, DatabaseError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reminder_logs WHERE task_id = $1")
            .bind(task_id)
            .fetch_one(self.pool.pool())
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl FiringStore for FiringRepository {
    #[instrument(skip(self, firing), fields(task_id = firing.task_id, variant = %firing.variant))]
    async fn append(&self, firing: &ReminderFiring) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO reminder_logs (
                task_id, group_id, variant, reminder_type,
                message_text, audience_size, fired_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(firing.task_id)
        .bind(&firing.group_id)
        .bind(firing.variant.to_string())
        .bind(&firing.reminder_type)
        .bind(&firing.message)
        .bind(firing.audience_size)
        .bind(firing.fired_at)
        .execute(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        Ok(())
    }
}
