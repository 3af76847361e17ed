// Time expression derivation
//
// Turns a task's base schedule into the concrete cron expressions of its
// reminder variants. Derived variants only model daily recurrence: every
// derived expression is a fixed wall-clock time evaluated in the engine's zone.

use crate::errors::ScheduleError;
use crate::models::{ReminderVariant, Task};
use chrono::{DateTime, NaiveTime, Timelike};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;
use tracing::warn;

pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// A concrete recurrence expression for one reminder variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedExpression {
    pub variant: ReminderVariant,
    pub expression: String,
    /// Set when the expression is a known-imprecise daily approximation of a
    /// non-daily base schedule
    pub degraded: bool,
}

impl DerivedExpression {
    fn exact(variant: ReminderVariant, expression: String) -> Self {
        Self {
            variant,
            expression,
            degraded: false,
        }
    }
}

/// Parse and validate a cron expression (seconds field first)
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    CronSchedule::from_str(expression).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// First occurrence of `expression` strictly after `after`, in `after`'s zone
pub fn next_occurrence(
    expression: &str,
    after: &DateTime<Tz>,
) -> Result<DateTime<Tz>, ScheduleError> {
    let schedule = parse_cron_expression(expression)?;
    schedule
        .after(after)
        .next()
        .ok_or_else(|| ScheduleError::NoNextOccurrence(expression.to_string()))
}

/// Cron expression firing once a day at `time` (seconds truncated)
pub fn daily_expression(time: NaiveTime) -> String {
    format!("0 {} {} * * *", time.minute(), time.hour())
}

/// `(time − minutes) mod 1440`, on minutes-of-day. Crossing midnight wraps to
/// the previous day's clock time; it never clamps.
pub fn minus_minutes_wrapping(time: NaiveTime, minutes: i64) -> NaiveTime {
    let minute_of_day = i64::from(time.hour() * 60 + time.minute());
    let wrapped = (minute_of_day - minutes).rem_euclid(MINUTES_PER_DAY);
    NaiveTime::from_hms_opt((wrapped / 60) as u32, (wrapped % 60) as u32, 0).unwrap_or_default()
}

/// True when the expression fires at one fixed wall-clock time every day:
/// literal second/minute/hour and wildcard day, month, weekday (and year).
pub fn is_daily_expression(expression: &str) -> bool {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 6 && fields.len() != 7 {
        return false;
    }

    let literal = |field: &str| field.parse::<u32>().is_ok();
    let wildcard = |field: &str| field == "*" || field == "?";

    fields[..3].iter().all(|f| literal(*f)) && fields[3..].iter().all(|f| wildcard(*f))
}

/// Every variant expression of `task` under the default kind strategies
pub fn derive_expressions(
    task: &Task,
    anchor: NaiveTime,
    now: &DateTime<Tz>,
) -> Result<Vec<DerivedExpression>, ScheduleError> {
    crate::scheduler::StrategyTable::default().derive_all(
        task,
        &TimeExpressionDeriver::new(anchor),
        now,
    )
}

/// Pure derivations from a task's schedule fields to daily expressions
#[derive(Debug, Clone, Copy)]
pub struct TimeExpressionDeriver {
    anchor: NaiveTime,
}

impl TimeExpressionDeriver {
    pub fn new(anchor: NaiveTime) -> Self {
        Self { anchor }
    }

    pub fn anchor_time(&self) -> NaiveTime {
        self.anchor
    }

    /// The fixed daily anchor, identical for every task
    pub fn anchor(&self) -> DerivedExpression {
        DerivedExpression::exact(ReminderVariant::Anchor, daily_expression(self.anchor))
    }

    /// `deadline − advance_minutes` as a daily time. `None` without a deadline.
    pub fn advance_before_deadline(&self, task: &Task) -> Option<DerivedExpression> {
        let deadline = task.deadline_time?;
        let time = minus_minutes_wrapping(deadline, i64::from(task.advance_minutes));
        Some(DerivedExpression::exact(
            ReminderVariant::Advance,
            daily_expression(time),
        ))
    }

    /// The deadline itself, daily. `None` without a deadline.
    pub fn deadline(&self, task: &Task) -> Option<DerivedExpression> {
        task.deadline_time.map(|deadline| {
            DerivedExpression::exact(ReminderVariant::Trigger, daily_expression(deadline))
        })
    }

    /// Resolves the next occurrence of the base schedule after `now`, subtracts
    /// the advance and generalises the result to a daily time.
    ///
    /// Only exact when the base schedule fires at the same wall-clock time
    /// every day. Weekly or monthly schedules still get a daily expression,
    /// flagged `degraded` and logged as a warning.
    pub fn advance_before_trigger(
        &self,
        task: &Task,
        now: &DateTime<Tz>,
    ) -> Result<DerivedExpression, ScheduleError> {
        let next = next_occurrence(&task.cron_expr, now)?;
        let time = minus_minutes_wrapping(next.time(), i64::from(task.advance_minutes));
        let degraded = !is_daily_expression(&task.cron_expr);

        if degraded {
            warn!(
                task_id = task.id,
                task_name = %task.name,
                cron_expr = %task.cron_expr,
                derived_time = %time.format("%H:%M"),
                "Base schedule is not daily; advance reminder approximated as a daily time"
            );
        }

        Ok(DerivedExpression {
            variant: ReminderVariant::Advance,
            expression: daily_expression(time),
            degraded,
        })
    }

    /// The base schedule, unmodified
    pub fn trigger(&self, task: &Task) -> DerivedExpression {
        DerivedExpression::exact(ReminderVariant::Trigger, task.cron_expr.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskKind, TaskStatus};
    use chrono::{TimeZone, Utc};

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn task(kind: TaskKind, cron_expr: &str, deadline: Option<NaiveTime>, advance: i32) -> Task {
        Task {
            id: 1,
            name: "daily report".to_string(),
            description: None,
            kind,
            cron_expr: cron_expr.to_string(),
            deadline_time: deadline,
            advance_minutes: advance,
            group_id: "cid-1".to_string(),
            creator_id: None,
            status: TaskStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_run_at: None,
            next_run_at: None,
        }
    }

    #[test]
    fn test_wrapping_crosses_midnight() {
        assert_eq!(minus_minutes_wrapping(hm(0, 10), 30), hm(23, 40));
        assert_eq!(minus_minutes_wrapping(hm(17, 0), 60), hm(16, 0));
        assert_eq!(minus_minutes_wrapping(hm(17, 0), 0), hm(17, 0));
        assert_eq!(minus_minutes_wrapping(hm(1, 0), 1440 + 90), hm(23, 30));
    }

    #[test]
    fn test_daily_expression_format() {
        assert_eq!(daily_expression(hm(16, 5)), "0 5 16 * * *");
        assert!(parse_cron_expression(&daily_expression(hm(23, 59))).is_ok());
    }

    #[test]
    fn test_is_daily_expression() {
        assert!(is_daily_expression("0 30 9 * * *"));
        assert!(is_daily_expression("0 30 9 * * ? *"));
        assert!(!is_daily_expression("0 0 17 * * Fri"));
        assert!(!is_daily_expression("0 0 9,18 * * *"));
        assert!(!is_daily_expression("0 0 9 1 * *"));
        assert!(!is_daily_expression("0 9 * * *"));
    }

    #[test]
    fn test_parse_rejects_malformed_expression() {
        let err = parse_cron_expression("every day at nine").unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCronExpression { .. }));
    }

    #[test]
    fn test_deadline_variants_need_a_deadline() {
        let deriver = TimeExpressionDeriver::new(hm(10, 0));
        let without = task(TaskKind::Deadline, "0 0 17 * * *", None, 60);
        assert!(deriver.advance_before_deadline(&without).is_none());
        assert!(deriver.deadline(&without).is_none());

        let with = task(TaskKind::Deadline, "0 0 17 * * *", Some(hm(17, 0)), 60);
        assert_eq!(
            deriver.advance_before_deadline(&with).unwrap().expression,
            "0 0 16 * * *"
        );
        assert_eq!(deriver.deadline(&with).unwrap().expression, "0 0 17 * * *");
    }

    #[test]
    fn test_advance_before_daily_trigger_is_exact() {
        let deriver = TimeExpressionDeriver::new(hm(10, 0));
        let t = task(TaskKind::Notification, "0 15 14 * * *", None, 30);
        let now = chrono_tz::Asia::Shanghai
            .with_ymd_and_hms(2024, 3, 4, 9, 0, 0)
            .unwrap();

        let derived = deriver.advance_before_trigger(&t, &now).unwrap();
        assert_eq!(derived.expression, "0 45 13 * * *");
        assert!(!derived.degraded);
    }

    #[test]
    fn test_advance_before_weekly_trigger_is_degraded() {
        let deriver = TimeExpressionDeriver::new(hm(10, 0));
        let t = task(TaskKind::Notification, "0 0 17 * * Fri", None, 15);
        let now = chrono_tz::Asia::Shanghai
            .with_ymd_and_hms(2024, 3, 4, 9, 0, 0)
            .unwrap();

        let derived = deriver.advance_before_trigger(&t, &now).unwrap();
        assert_eq!(derived.expression, "0 45 16 * * *");
        assert!(derived.degraded);
    }

    #[test]
    fn test_advance_before_trigger_wraps_past_midnight() {
        let deriver = TimeExpressionDeriver::new(hm(10, 0));
        let t = task(TaskKind::Notification, "0 5 0 * * *", None, 20);
        let now = chrono_tz::Asia::Shanghai
            .with_ymd_and_hms(2024, 3, 4, 12, 0, 0)
            .unwrap();

        let derived = deriver.advance_before_trigger(&t, &now).unwrap();
        assert_eq!(derived.expression, "0 45 23 * * *");
    }

    #[test]
    fn test_trigger_is_base_schedule() {
        let deriver = TimeExpressionDeriver::new(hm(10, 0));
        let t = task(TaskKind::Notification, "0 0 17 * * Fri", None, 15);
        assert_eq!(deriver.trigger(&t).expression, "0 0 17 * * Fri");
        assert_eq!(deriver.anchor().expression, "0 0 10 * * *");
    }
}
