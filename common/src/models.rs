use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

/// Task identifier as assigned by the task store
pub type TaskId = i64;

/// Chat-platform identifier of a group member
pub type PersonId = String;

/// Chat-platform identifier of a group / conversation
pub type GroupId = String;

// ============================================================================
// Task Models
// ============================================================================

/// Task is a recurring obligation tracked per group
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: Option<String>,
    #[sqlx(try_from = "String")]
    pub kind: TaskKind,
    /// Base schedule, cron syntax with a leading seconds field
    pub cron_expr: String,
    /// Only meaningful for `TaskKind::Deadline`
    pub deadline_time: Option<NaiveTime>,
    pub advance_minutes: i32,
    pub group_id: GroupId,
    pub creator_id: Option<PersonId>,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Active
    }

    /// The subset of fields that decide which jobs a task owns and what they say.
    /// Two tasks with equal fingerprints need no re-registration.
    pub fn scheduling_fingerprint(&self) -> SchedulingFingerprint {
        SchedulingFingerprint {
            name: self.name.clone(),
            description: self.description.clone(),
            kind: self.kind,
            cron_expr: self.cron_expr.clone(),
            deadline_time: self.deadline_time,
            advance_minutes: self.advance_minutes,
            group_id: self.group_id.clone(),
        }
    }
}

/// Scheduling-relevant snapshot of a task, compared during reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingFingerprint {
    pub name: String,
    pub description: Option<String>,
    pub kind: TaskKind,
    pub cron_expr: String,
    pub deadline_time: Option<NaiveTime>,
    pub advance_minutes: i32,
    pub group_id: GroupId,
}

/// Input for creating a task through the task store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub description: Option<String>,
    pub kind: TaskKind,
    pub cron_expr: String,
    pub deadline_time: Option<NaiveTime>,
    pub advance_minutes: i32,
    pub group_id: GroupId,
    pub creator_id: Option<PersonId>,
}

/// TaskKind decides the fixed set of reminder variants a task owns
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    /// Members must check in before a daily deadline
    #[serde(rename = "TASK")]
    Deadline,
    /// Plain heads-up, nobody checks in
    Notification,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Deadline => write!(f, "TASK"),
            TaskKind::Notification => write!(f, "NOTIFICATION"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TASK" => Ok(TaskKind::Deadline),
            "NOTIFICATION" => Ok(TaskKind::Notification),
            _ => Err(format!("Invalid task kind: {}", s)),
        }
    }
}

impl TryFrom<String> for TaskKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

/// TaskStatus is the lifecycle state of a task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Active,
    Paused,
    Deleted,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Active => write!(f, "ACTIVE"),
            TaskStatus::Paused => write!(f, "PAUSED"),
            TaskStatus::Deleted => write!(f, "DELETED"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(TaskStatus::Active),
            "PAUSED" => Ok(TaskStatus::Paused),
            "DELETED" => Ok(TaskStatus::Deleted),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

// ============================================================================
// Reminder Models
// ============================================================================

/// One of the distinct firings derived from a task's base schedule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ReminderVariant {
    /// Fixed daily reminder shared by every task
    Anchor,
    /// Fires `advance_minutes` before the deadline / trigger
    Advance,
    /// The deadline itself (deadline tasks) or the base schedule (notifications)
    Trigger,
}

impl ReminderVariant {
    /// Audit label for a firing of this variant on a task of `kind`
    pub fn label(&self, kind: TaskKind) -> &'static str {
        match (self, kind) {
            (ReminderVariant::Anchor, _) => "MORNING",
            (ReminderVariant::Advance, _) => "ADVANCE",
            (ReminderVariant::Trigger, TaskKind::Deadline) => "DEADLINE",
            (ReminderVariant::Trigger, TaskKind::Notification) => "TRIGGER",
        }
    }
}

impl std::fmt::Display for ReminderVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderVariant::Anchor => write!(f, "anchor"),
            ReminderVariant::Advance => write!(f, "advance"),
            ReminderVariant::Trigger => write!(f, "trigger"),
        }
    }
}

/// Identity of a scheduled job: one per (task, variant)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub task_id: TaskId,
    pub variant: ReminderVariant,
}

impl JobKey {
    pub fn new(task_id: TaskId, variant: ReminderVariant) -> Self {
        Self { task_id, variant }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task:{}:{}", self.task_id, self.variant)
    }
}

/// Audit row written once per delivered firing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReminderFiring {
    pub task_id: TaskId,
    pub group_id: GroupId,
    pub variant: ReminderVariant,
    pub reminder_type: String,
    pub message: String,
    pub audience_size: i32,
    pub fired_at: DateTime<Utc>,
}

// ============================================================================
// Completion Models
// ============================================================================

/// At most one record exists per (task, person, day)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct CompletionRecord {
    pub task_id: TaskId,
    pub person_id: PersonId,
    pub person_name: Option<String>,
    pub day: NaiveDate,
    pub on_time: bool,
    pub completed_at: DateTime<Utc>,
}

/// Result of attempting to store a completion record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Caller-facing result of a check-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionOutcome {
    Recorded { on_time: bool },
    /// The person already checked in for this task today; the first record stands
    DuplicateCompletion,
}

/// Completion summary for one task on one day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayStats {
    pub task_id: TaskId,
    pub task_name: String,
    pub kind: TaskKind,
    pub day: NaiveDate,
    pub total_members: usize,
    pub completed_count: usize,
    pub completion_rate: f64,
    pub pending: Vec<PersonId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_kind_round_trips_wire_names() {
        assert_eq!("TASK".parse::<TaskKind>().unwrap(), TaskKind::Deadline);
        assert_eq!(TaskKind::Notification.to_string(), "NOTIFICATION");
        assert!("weekly".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_task_status_rejects_unknown() {
        assert_eq!(
            TaskStatus::try_from("PAUSED".to_string()).unwrap(),
            TaskStatus::Paused
        );
        assert!(TaskStatus::try_from("archived".to_string()).is_err());
    }

    #[test]
    fn test_variant_labels_follow_kind() {
        assert_eq!(ReminderVariant::Trigger.label(TaskKind::Deadline), "DEADLINE");
        assert_eq!(
            ReminderVariant::Trigger.label(TaskKind::Notification),
            "TRIGGER"
        );
        assert_eq!(ReminderVariant::Anchor.label(TaskKind::Deadline), "MORNING");
    }

    #[test]
    fn test_job_key_display() {
        let key = JobKey::new(42, ReminderVariant::Advance);
        assert_eq!(key.to_string(), "task:42:advance");
    }

    #[test]
    fn test_task_kind_serde_uses_wire_names() {
        let json = serde_json::to_string(&TaskKind::Deadline).unwrap();
        assert_eq!(json, "\"TASK\"");
        let kind: TaskKind = serde_json::from_str("\"NOTIFICATION\"").unwrap();
        assert_eq!(kind, TaskKind::Notification);
    }
}
