// Completion record repository implementation

use crate::db::DbPool;
use crate::errors::{DatabaseError, StorageError};
use crate::models::{CompletionRecord, InsertOutcome, PersonId, TaskId};
use crate::store::CompletionStore;
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::instrument;

/// Repository for the completion ledger table.
///
/// Uniqueness of (task_id, person_id, day) is enforced by the table's UNIQUE
/// constraint; `ON CONFLICT DO NOTHING` turns a conflict into an empty
/// `RETURNING` set instead of an error.
pub struct CompletionRepository {
    pool: DbPool,
}

impl CompletionRepository {
    /// Create a new CompletionRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// All records of a task for one day, oldest first
    #[instrument(skip(self))]
    pub async fn find_by_day(
        &self,
        task_id: TaskId,
        day: NaiveDate,
    ) -> Result<Vec<CompletionRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, CompletionRecord>(&format!(
            "SELECT {} FROM completion_records WHERE task_id = $1 AND day = $2 ORDER BY completed_at",
            super::queries::completion_queries::SELECT_ALL_COLUMNS
        ))
        .bind(task_id)
        .bind(day)
        .fetch_all(self.pool.pool())
        .await?;

        Ok(records)
    }
}

#[async_trait]
impl CompletionStore for CompletionRepository {
    #[instrument(skip(self, record), fields(task_id = record.task_id, person_id = %record.person_id, day = %record.day))]
    async fn insert(&self, record: &CompletionRecord) -> Result<InsertOutcome, StorageError> {
        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO completion_records (
                task_id, person_id, person_name, day, on_time, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (task_id, person_id, day) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.task_id)
        .bind(&record.person_id)
        .bind(&record.person_name)
        .bind(record.day)
        .bind(record.on_time)
        .bind(record.completed_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        Ok(match inserted {
            Some(_) => InsertOutcome::Inserted,
            None => InsertOutcome::Duplicate,
        })
    }

    #[instrument(skip(self))]
    async fn exists(
        &self,
        task_id: TaskId,
        person_id: &str,
        day: NaiveDate,
    ) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM completion_records
                WHERE task_id = $1 AND person_id = $2 AND day = $3
            )
            "#,
        )
        .bind(task_id)
        .bind(person_id)
        .bind(day)
        .fetch_one(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        Ok(exists)
    }

    #[instrument(skip(self))]
    async fn completed_persons(
        &self,
        task_id: TaskId,
        day: NaiveDate,
    ) -> Result<Vec<PersonId>, StorageError> {
        let persons: Vec<String> = sqlx::query_scalar(
            "SELECT person_id FROM completion_records WHERE task_id = $1 AND day = $2",
        )
        .bind(task_id)
        .bind(day)
        .fetch_all(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        Ok(persons)
    }
}
