// Persistence collaborators consumed by the reminder engine
//
// The engine never owns durable state. Tasks, completion records and firing
// audits live behind these traits; the PostgreSQL repositories and the
// in-memory store both implement them.

use crate::errors::StorageError;
use crate::models::{
    CompletionRecord, GroupId, InsertOutcome, NewTask, PersonId, ReminderFiring, Task, TaskId,
    TaskStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::mpsc;

/// Change notifications flowing from the task store to the reminder service
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Emitted exactly once per newly created task
    Created(Task),
}

pub type TaskEventSender = mpsc::UnboundedSender<TaskEvent>;
pub type TaskEventReceiver = mpsc::UnboundedReceiver<TaskEvent>;

/// Create the channel carrying task events to the reminder service
pub fn task_event_channel() -> (TaskEventSender, TaskEventReceiver) {
    mpsc::unbounded_channel()
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks with status Active
    async fn list_active(&self) -> Result<Vec<Task>, StorageError>;

    /// Active tasks owned by one group
    async fn get_by_group(&self, group_id: &str) -> Result<Vec<Task>, StorageError>;

    async fn get(&self, task_id: TaskId) -> Result<Option<Task>, StorageError>;

    /// Persist a new Active task and emit `TaskEvent::Created` for it
    async fn create(&self, task: NewTask) -> Result<Task, StorageError>;

    async fn update_status(&self, task_id: TaskId, status: TaskStatus)
        -> Result<(), StorageError>;

    async fn update_run_bookkeeping(
        &self,
        task_id: TaskId,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait CompletionStore: Send + Sync {
    /// Atomic, conflict-detecting insert keyed on (task, person, day).
    /// A conflicting insert leaves the stored record untouched.
    async fn insert(&self, record: &CompletionRecord) -> Result<InsertOutcome, StorageError>;

    async fn exists(
        &self,
        task_id: TaskId,
        person_id: &str,
        day: NaiveDate,
    ) -> Result<bool, StorageError>;

    /// Persons holding a completion record for the task on `day`
    async fn completed_persons(
        &self,
        task_id: TaskId,
        day: NaiveDate,
    ) -> Result<Vec<PersonId>, StorageError>;
}

#[async_trait]
pub trait FiringStore: Send + Sync {
    /// Append-only audit of delivered firings
    async fn append(&self, firing: &ReminderFiring) -> Result<(), StorageError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RosterDirectory: Send + Sync {
    /// Members of the group, excluding the exempt overseer role
    async fn non_exempt_members(&self, group_id: &GroupId) -> Result<Vec<PersonId>, StorageError>;
}
