// Property-based tests for the completion ledger

use chrono::{NaiveDate, NaiveTime, Utc};
use common::clock::{Clock, FixedClock};
use common::db::MemoryStore;
use common::ledger::CompletionLedger;
use common::models::{CompletionOutcome, Task, TaskKind, TaskStatus};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::runtime::Runtime;

const GROUP: &str = "cid-ops";

fn deadline_task() -> Task {
    Task {
        id: 7,
        name: "daily report".to_string(),
        description: None,
        kind: TaskKind::Deadline,
        cron_expr: "0 0 17 * * *".to_string(),
        deadline_time: NaiveTime::from_hms_opt(17, 0, 0),
        advance_minutes: 60,
        group_id: GROUP.to_string(),
        creator_id: None,
        status: TaskStatus::Active,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        last_run_at: None,
        next_run_at: None,
    }
}

fn ledger(store: &Arc<MemoryStore>, hour: u32) -> CompletionLedger {
    let clock: Arc<dyn Clock> =
        Arc::new(FixedClock::at_local(chrono_tz::Asia::Shanghai, 2024, 3, 4, hour, 0).unwrap());
    CompletionLedger::new(store.clone(), store.clone(), clock)
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

/// *For any* roster and order of check-ins, the incomplete audience only
/// shrinks, loses exactly the people who checked in, and never contains
/// an exempt overseer.
#[test]
fn property_incomplete_audience_shrinks_monotonically() {
    proptest!(|(
        roster_size in 1usize..12,
        check_ins in prop::collection::vec(0usize..12, 0..24),
    )| {
        let rt = Runtime::new()?;
        rt.block_on(async {
            let store = Arc::new(MemoryStore::new());
            let people: Vec<String> = (0..roster_size).map(|i| format!("person-{}", i)).collect();
            let refs: Vec<&str> = people.iter().map(String::as_str).collect();
            store.set_roster(GROUP, &refs);
            store.add_overseer(GROUP, "manager");

            let ledger = ledger(&store, 9);
            let task = deadline_task();

            let mut previous: BTreeSet<String> = ledger.incomplete_members(&task, day()).await.unwrap();
            prop_assert_eq!(previous.len(), roster_size);
            prop_assert!(!previous.contains("manager"));

            let mut completed = BTreeSet::new();
            for index in check_ins {
                let person = format!("person-{}", index);
                ledger.record_completion(task.id, &person, day(), true).await.unwrap();
                completed.insert(person);

                let current = ledger.incomplete_members(&task, day()).await.unwrap();
                prop_assert!(current.is_subset(&previous));
                prop_assert!(current.iter().all(|p| !completed.contains(p)));
                previous = current;
            }

            let expected: BTreeSet<String> = people
                .iter()
                .filter(|p| !completed.contains(*p))
                .cloned()
                .collect();
            prop_assert_eq!(previous, expected);

            // Another day starts with the full roster again
            let tomorrow = day().succ_opt().unwrap();
            prop_assert_eq!(
                ledger.incomplete_members(&task, tomorrow).await.unwrap().len(),
                roster_size
            );
            Ok(())
        })?;
    });
}

/// *For any* number of concurrent check-ins by one person on one day,
/// exactly one is recorded and the rest report a duplicate.
#[test]
fn property_concurrent_check_ins_record_exactly_once() {
    proptest!(|(contenders in 2usize..16)| {
        let rt = Runtime::new()?;
        rt.block_on(async {
            let store = Arc::new(MemoryStore::new());
            store.set_roster(GROUP, &["alice", "bob"]);
            let ledger = Arc::new(ledger(&store, 9));

            let attempts = (0..contenders).map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger.record_completion(7, "alice", day(), true).await
                })
            });
            let results: Vec<CompletionOutcome> = futures::future::join_all(attempts)
                .await
                .into_iter()
                .map(|joined| joined.unwrap().unwrap())
                .collect();

            let recorded = results
                .iter()
                .filter(|r| matches!(r, CompletionOutcome::Recorded { .. }))
                .count();
            prop_assert_eq!(recorded, 1);
            prop_assert_eq!(store.completion_count(), 1);
            prop_assert!(ledger.has_completed(7, "alice", day()).await.unwrap());
            prop_assert!(!ledger.has_completed(7, "bob", day()).await.unwrap());
            Ok(())
        })?;
    });
}

#[tokio::test]
async fn test_late_check_in_keeps_first_on_time_flag() {
    let store = Arc::new(MemoryStore::new());
    store.set_roster(GROUP, &["alice"]);
    let task = deadline_task();

    let late = ledger(&store, 18);
    let first = late.check_in(&task, "alice", Some("Alice")).await.unwrap();
    assert_eq!(first, CompletionOutcome::Recorded { on_time: false });

    let again = late.record_completion(task.id, "alice", day(), true).await.unwrap();
    assert_eq!(again, CompletionOutcome::DuplicateCompletion);

    let stored = store.completion(task.id, "alice", day()).unwrap();
    assert!(!stored.on_time);
    assert_eq!(stored.person_name.as_deref(), Some("Alice"));
}

#[tokio::test]
async fn test_day_stats_counts_only_non_exempt_members() {
    let store = Arc::new(MemoryStore::new());
    store.set_roster(GROUP, &["alice", "bob", "carol", "dave"]);
    store.add_overseer(GROUP, "manager");
    let ledger = ledger(&store, 9);
    let task = deadline_task();

    ledger.record_completion(task.id, "alice", day(), true).await.unwrap();
    ledger.record_completion(task.id, "manager", day(), true).await.unwrap();

    let stats = ledger.day_stats(&task, day()).await.unwrap();
    assert_eq!(stats.total_members, 4);
    assert_eq!(stats.completed_count, 1);
    assert!((stats.completion_rate - 25.0).abs() < f64::EPSILON);
    assert_eq!(stats.pending, vec!["bob", "carol", "dave"]);
}

#[tokio::test]
async fn test_week_stats_restart_after_sunday() {
    let store = Arc::new(MemoryStore::new());
    store.set_roster(GROUP, &["alice", "bob"]);
    let ledger = ledger(&store, 9);
    let task = deadline_task();

    let monday = day();
    let sunday = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
    let next_monday = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
    ledger.record_completion(task.id, "alice", monday, true).await.unwrap();
    ledger.record_completion(task.id, "alice", sunday, true).await.unwrap();
    ledger.record_completion(task.id, "bob", sunday, false).await.unwrap();
    ledger.record_completion(task.id, "bob", next_monday, true).await.unwrap();

    let week = ledger.week_stats(&task, sunday).await.unwrap();
    let days: Vec<NaiveDate> = week.iter().map(|s| s.day).collect();
    assert_eq!(days, monday.iter_days().take(7).collect::<Vec<_>>());
    assert_eq!(week[0].completed_count, 1);
    assert_eq!(week[0].pending, vec!["bob"]);
    assert!(week[1..6].iter().all(|s| s.completed_count == 0));
    assert_eq!(week[6].completed_count, 2);
    assert!((week[6].completion_rate - 100.0).abs() < f64::EPSILON);

    // A new week starts on Monday and ignores last week's records
    let fresh = ledger.week_stats(&task, next_monday).await.unwrap();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].day, next_monday);
    assert_eq!(fresh[0].completed_count, 1);
    assert_eq!(fresh[0].pending, vec!["alice"]);

    // Midweek covers Monday through the given day
    let wednesday = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
    assert_eq!(ledger.week_stats(&task, wednesday).await.unwrap().len(), 3);
}
