// In-process implementation of every persistence collaborator
//
// Used by the test suites and for running the engine without PostgreSQL.
// The completion table enforces the same (task, person, day) uniqueness as
// the database constraint, checked and inserted under one lock.

use crate::errors::StorageError;
use crate::models::{
    CompletionRecord, GroupId, InsertOutcome, NewTask, PersonId, ReminderFiring, Task, TaskId,
    TaskStatus,
};
use crate::store::{
    CompletionStore, FiringStore, RosterDirectory, TaskEvent, TaskEventSender, TaskStore,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct Member {
    person_id: PersonId,
    exempt: bool,
}

#[derive(Default)]
struct Inner {
    next_task_id: TaskId,
    tasks: BTreeMap<TaskId, Task>,
    completions: HashMap<(TaskId, PersonId, NaiveDate), CompletionRecord>,
    firings: Vec<ReminderFiring>,
    rosters: HashMap<GroupId, Vec<Member>>,
    fail_appends: bool,
}

/// Mutex-guarded tables standing in for the relational schema
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    events: Option<TaskEventSender>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `TaskEvent::Created` on `events` whenever a task is created
    pub fn with_events(events: TaskEventSender) -> Self {
        Self {
            inner: Mutex::default(),
            events: Some(events),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the group's roster with regular (non-exempt) members
    pub fn set_roster(&self, group_id: &str, members: &[&str]) {
        let members = members
            .iter()
            .map(|id| Member {
                person_id: id.to_string(),
                exempt: false,
            })
            .collect();
        self.lock().rosters.insert(group_id.to_string(), members);
    }

    /// Add a member of the exempt overseer class to the group
    pub fn add_overseer(&self, group_id: &str, person_id: &str) {
        self.lock()
            .rosters
            .entry(group_id.to_string())
            .or_default()
            .push(Member {
                person_id: person_id.to_string(),
                exempt: true,
            });
    }

    /// Store a task as-is, bypassing creation events. Used to seed state that
    /// predates the running process.
    pub fn insert_task(&self, task: Task) {
        let mut inner = self.lock();
        inner.next_task_id = inner.next_task_id.max(task.id);
        inner.tasks.insert(task.id, task);
    }

    /// Overwrite a stored task, e.g. to simulate an edit made elsewhere
    pub fn replace_task(&self, task: Task) {
        self.lock().tasks.insert(task.id, task);
    }

    /// Make subsequent firing appends fail, to exercise audit-write failures
    pub fn set_fail_appends(&self, fail: bool) {
        self.lock().fail_appends = fail;
    }

    pub fn firings(&self) -> Vec<ReminderFiring> {
        self.lock().firings.clone()
    }

    pub fn completion(
        &self,
        task_id: TaskId,
        person_id: &str,
        day: NaiveDate,
    ) -> Option<CompletionRecord> {
        self.lock()
            .completions
            .get(&(task_id, person_id.to_string(), day))
            .cloned()
    }

    pub fn completion_count(&self) -> usize {
        self.lock().completions.len()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list_active(&self) -> Result<Vec<Task>, StorageError> {
        Ok(self
            .lock()
            .tasks
            .values()
            .filter(|task| task.is_active())
            .cloned()
            .collect())
    }

    async fn get_by_group(&self, group_id: &str) -> Result<Vec<Task>, StorageError> {
        Ok(self
            .lock()
            .tasks
            .values()
            .filter(|task| task.is_active() && task.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<Task>, StorageError> {
        Ok(self.lock().tasks.get(&task_id).cloned())
    }

    async fn create(&self, new_task: NewTask) -> Result<Task, StorageError> {
        let task = {
            let mut inner = self.lock();
            inner.next_task_id += 1;
            let now = Utc::now();
            let task = Task {
                id: inner.next_task_id,
                name: new_task.name,
                description: new_task.description,
                kind: new_task.kind,
                cron_expr: new_task.cron_expr,
                deadline_time: new_task.deadline_time,
                advance_minutes: new_task.advance_minutes,
                group_id: new_task.group_id,
                creator_id: new_task.creator_id,
                status: TaskStatus::Active,
                created_at: now,
                updated_at: now,
                last_run_at: None,
                next_run_at: None,
            };
            inner.tasks.insert(task.id, task.clone());
            task
        };

        if let Some(events) = &self.events {
            events
                .send(TaskEvent::Created(task.clone()))
                .map_err(|e| StorageError::EventChannelClosed(e.to_string()))?;
        }

        debug!(task_id = task.id, "Task created in memory store");
        Ok(task)
    }

    async fn update_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| StorageError::NotFound(format!("Task not found: {}", task_id)))?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn update_run_bookkeeping(
        &self,
        task_id: TaskId,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let task = inner
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| StorageError::NotFound(format!("Task not found: {}", task_id)))?;
        task.last_run_at = Some(last_run);
        task.next_run_at = next_run;
        Ok(())
    }
}

#[async_trait]
impl CompletionStore for MemoryStore {
    async fn insert(&self, record: &CompletionRecord) -> Result<InsertOutcome, StorageError> {
        let key = (record.task_id, record.person_id.clone(), record.day);
        let mut inner = self.lock();
        if inner.completions.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        inner.completions.insert(key, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn exists(
        &self,
        task_id: TaskId,
        person_id: &str,
        day: NaiveDate,
    ) -> Result<bool, StorageError> {
        Ok(self
            .lock()
            .completions
            .contains_key(&(task_id, person_id.to_string(), day)))
    }

    async fn completed_persons(
        &self,
        task_id: TaskId,
        day: NaiveDate,
    ) -> Result<Vec<PersonId>, StorageError> {
        Ok(self
            .lock()
            .completions
            .values()
            .filter(|record| record.task_id == task_id && record.day == day)
            .map(|record| record.person_id.clone())
            .collect())
    }
}

#[async_trait]
impl FiringStore for MemoryStore {
    async fn append(&self, firing: &ReminderFiring) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.fail_appends {
            return Err(StorageError::DatabaseError(
                "reminder_logs unavailable".to_string(),
            ));
        }
        inner.firings.push(firing.clone());
        Ok(())
    }
}

#[async_trait]
impl RosterDirectory for MemoryStore {
    async fn non_exempt_members(&self, group_id: &GroupId) -> Result<Vec<PersonId>, StorageError> {
        Ok(self
            .lock()
            .rosters
            .get(group_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|member| !member.exempt)
                    .map(|member| member.person_id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
