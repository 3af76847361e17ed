// Completion ledger: who has satisfied which task on which day

use crate::clock::Clock;
use crate::errors::StorageError;
use crate::models::{
    CompletionOutcome, CompletionRecord, DayStats, InsertOutcome, PersonId, Task, TaskId, TaskKind,
};
use crate::store::{CompletionStore, RosterDirectory};
use crate::telemetry;
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// At-most-one completion per (task, person, day), plus the audience
/// computations built on top of it.
///
/// Uniqueness is the store's job: the ledger relies on its conflict-detecting
/// insert instead of locking, so concurrent check-ins for the same triple
/// resolve to exactly one record.
pub struct CompletionLedger {
    completions: Arc<dyn CompletionStore>,
    roster: Arc<dyn RosterDirectory>,
    clock: Arc<dyn Clock>,
}

impl CompletionLedger {
    pub fn new(
        completions: Arc<dyn CompletionStore>,
        roster: Arc<dyn RosterDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            completions,
            roster,
            clock,
        }
    }

    /// Insert a completion. A second call for the same triple yields
    /// `DuplicateCompletion` and keeps the first record's on-time flag.
    #[instrument(skip(self))]
    pub async fn record_completion(
        &self,
        task_id: TaskId,
        person_id: &str,
        day: NaiveDate,
        on_time: bool,
    ) -> Result<CompletionOutcome, StorageError> {
        self.insert(task_id, person_id, None, day, on_time).await
    }

    pub async fn has_completed(
        &self,
        task_id: TaskId,
        person_id: &str,
        day: NaiveDate,
    ) -> Result<bool, StorageError> {
        self.completions.exists(task_id, person_id, day).await
    }

    /// `roster` minus everyone holding a completion for `day`
    pub async fn incomplete_audience(
        &self,
        task_id: TaskId,
        day: NaiveDate,
        roster: &[PersonId],
    ) -> Result<BTreeSet<PersonId>, StorageError> {
        let completed: HashSet<PersonId> = self
            .completions
            .completed_persons(task_id, day)
            .await?
            .into_iter()
            .collect();

        Ok(roster
            .iter()
            .filter(|person| !completed.contains(*person))
            .cloned()
            .collect())
    }

    /// Every non-exempt member of the task's group
    pub async fn members(&self, task: &Task) -> Result<Vec<PersonId>, StorageError> {
        self.roster.non_exempt_members(&task.group_id).await
    }

    /// Non-exempt members of the task's group who have not completed on `day`
    pub async fn incomplete_members(
        &self,
        task: &Task,
        day: NaiveDate,
    ) -> Result<BTreeSet<PersonId>, StorageError> {
        let roster = self.roster.non_exempt_members(&task.group_id).await?;
        self.incomplete_audience(task.id, day, &roster).await
    }

    /// Record a check-in made now: derives the local day and the on-time flag
    #[instrument(skip(self, task), fields(task_id = task.id))]
    pub async fn check_in(
        &self,
        task: &Task,
        person_id: &str,
        person_name: Option<&str>,
    ) -> Result<CompletionOutcome, StorageError> {
        let now = self.clock.now();
        let on_time = is_on_time(task, &now);
        self.insert(task.id, person_id, person_name, now.date_naive(), on_time)
            .await
    }

    /// Completion summary of one task for one day
    pub async fn day_stats(&self, task: &Task, day: NaiveDate) -> Result<DayStats, StorageError> {
        let roster = self.roster.non_exempt_members(&task.group_id).await?;
        let pending = self.incomplete_audience(task.id, day, &roster).await?;

        let total_members = roster.len();
        let completed_count = total_members - pending.len();
        let completion_rate = if total_members > 0 {
            completed_count as f64 / total_members as f64 * 100.0
        } else {
            0.0
        };

        Ok(DayStats {
            task_id: task.id,
            task_name: task.name.clone(),
            kind: task.kind,
            day,
            total_members,
            completed_count,
            completion_rate,
            pending: pending.into_iter().collect(),
        })
    }

    /// Per-day summaries from Monday of `today`'s week through `today`
    #[instrument(skip(self, task), fields(task_id = task.id))]
    pub async fn week_stats(
        &self,
        task: &Task,
        today: NaiveDate,
    ) -> Result<Vec<DayStats>, StorageError> {
        let monday = today - Days::new(u64::from(today.weekday().num_days_from_monday()));

        let mut week = Vec::new();
        for day in monday.iter_days().take_while(|day| *day <= today) {
            week.push(self.day_stats(task, day).await?);
        }
        debug!(days = week.len(), %monday, "Week stats computed");
        Ok(week)
    }

    async fn insert(
        &self,
        task_id: TaskId,
        person_id: &str,
        person_name: Option<&str>,
        day: NaiveDate,
        on_time: bool,
    ) -> Result<CompletionOutcome, StorageError> {
        let record = CompletionRecord {
            task_id,
            person_id: person_id.to_string(),
            person_name: person_name.map(str::to_string),
            day,
            on_time,
            completed_at: Utc::now(),
        };

        match self.completions.insert(&record).await? {
            InsertOutcome::Inserted => {
                telemetry::record_completion(on_time);
                info!(task_id, person_id, %day, on_time, "Completion recorded");
                Ok(CompletionOutcome::Recorded { on_time })
            }
            InsertOutcome::Duplicate => {
                debug!(task_id, person_id, %day, "Completion already recorded for today");
                Ok(CompletionOutcome::DuplicateCompletion)
            }
        }
    }
}

/// Deadline tasks are late once the local time-of-day passes the deadline;
/// everything else is always on time.
pub fn is_on_time(task: &Task, now: &DateTime<Tz>) -> bool {
    match (task.kind, task.deadline_time) {
        (TaskKind::Deadline, Some(deadline)) => now.time() <= deadline,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::memory::MemoryStore;
    use crate::models::{NewTask, TaskKind};
    use crate::store::TaskStore;
    use chrono::NaiveTime;

    fn clock_at(hour: u32, minute: u32) -> FixedClock {
        FixedClock::at_local(chrono_tz::Asia::Shanghai, 2024, 3, 4, hour, minute).unwrap()
    }

    async fn setup(clock: FixedClock) -> (CompletionLedger, Task) {
        let store = Arc::new(MemoryStore::new());
        store.set_roster("cid-1", &["alice", "bob", "carol"]);
        let task = store
            .create(NewTask {
                name: "daily report".to_string(),
                description: None,
                kind: TaskKind::Deadline,
                cron_expr: "0 0 17 * * *".to_string(),
                deadline_time: NaiveTime::from_hms_opt(17, 0, 0),
                advance_minutes: 60,
                group_id: "cid-1".to_string(),
                creator_id: None,
            })
            .await
            .unwrap();
        let ledger = CompletionLedger::new(store.clone(), store, Arc::new(clock));
        (ledger, task)
    }

    #[tokio::test]
    async fn test_duplicate_keeps_first_on_time_flag() {
        let (ledger, task) = setup(clock_at(9, 0)).await;
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        let first = ledger
            .record_completion(task.id, "alice", day, true)
            .await
            .unwrap();
        let second = ledger
            .record_completion(task.id, "alice", day, false)
            .await
            .unwrap();

        assert_eq!(first, CompletionOutcome::Recorded { on_time: true });
        assert_eq!(second, CompletionOutcome::DuplicateCompletion);
        assert!(ledger.has_completed(task.id, "alice", day).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_person_next_day_is_a_new_record() {
        let (ledger, task) = setup(clock_at(9, 0)).await;
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        ledger
            .record_completion(task.id, "bob", monday, true)
            .await
            .unwrap();
        let outcome = ledger
            .record_completion(task.id, "bob", tuesday, true)
            .await
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::Recorded { on_time: true });
    }

    #[tokio::test]
    async fn test_incomplete_members_excludes_completed() {
        let (ledger, task) = setup(clock_at(9, 0)).await;
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        ledger
            .record_completion(task.id, "bob", day, true)
            .await
            .unwrap();
        let pending = ledger.incomplete_members(&task, day).await.unwrap();
        let expected: BTreeSet<PersonId> =
            ["alice", "carol"].iter().map(|s| s.to_string()).collect();
        assert_eq!(pending, expected);
    }

    #[tokio::test]
    async fn test_check_in_after_deadline_is_late() {
        let (ledger, task) = setup(clock_at(17, 30)).await;
        let outcome = ledger.check_in(&task, "carol", Some("Carol")).await.unwrap();
        assert_eq!(outcome, CompletionOutcome::Recorded { on_time: false });
    }

    #[tokio::test]
    async fn test_check_in_before_deadline_is_on_time() {
        let (ledger, task) = setup(clock_at(16, 59)).await;
        let outcome = ledger.check_in(&task, "carol", None).await.unwrap();
        assert_eq!(outcome, CompletionOutcome::Recorded { on_time: true });
    }

    #[tokio::test]
    async fn test_day_stats() {
        let (ledger, task) = setup(clock_at(12, 0)).await;
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        ledger
            .record_completion(task.id, "alice", day, true)
            .await
            .unwrap();

        let stats = ledger.day_stats(&task, day).await.unwrap();
        assert_eq!(stats.total_members, 3);
        assert_eq!(stats.completed_count, 1);
        assert_eq!(stats.pending, vec!["bob".to_string(), "carol".to_string()]);
        assert!((stats.completion_rate - 100.0 / 3.0).abs() < 1e-9);
    }
}
