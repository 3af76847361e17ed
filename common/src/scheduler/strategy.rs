// Per-kind reminder behaviour
//
// A task's kind decides which variants it owns, how each variant's expression
// is derived, who receives a firing and what the message says. All of that is
// bundled in one `KindStrategy` per kind and looked up through `StrategyTable`,
// so supporting a new kind means one new impl and one `register` call.

use crate::errors::{ScheduleError, StorageError};
use crate::ledger::CompletionLedger;
use crate::models::{PersonId, ReminderVariant, Task, TaskKind};
use crate::schedule::{parse_cron_expression, DerivedExpression, TimeExpressionDeriver};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Rendered notification content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderMessage {
    pub title: String,
    pub body: String,
}

#[async_trait]
pub trait KindStrategy: Send + Sync {
    /// Fixed variant set of the kind, in registration order
    fn variants(&self) -> &'static [ReminderVariant];

    /// Expression for one variant. `Ok(None)` when the task lacks the fields
    /// the variant needs.
    fn derive(
        &self,
        deriver: &TimeExpressionDeriver,
        task: &Task,
        variant: ReminderVariant,
        now: &DateTime<Tz>,
    ) -> Result<Option<DerivedExpression>, ScheduleError>;

    /// Persons to mention in a firing on `day`
    async fn resolve_audience(
        &self,
        ledger: &CompletionLedger,
        task: &Task,
        day: NaiveDate,
    ) -> Result<Vec<PersonId>, StorageError>;

    fn render(
        &self,
        task: &Task,
        variant: ReminderVariant,
        audience: &[PersonId],
        fired_at: &DateTime<Tz>,
    ) -> ReminderMessage;
}

const ALL_VARIANTS: [ReminderVariant; 3] = [
    ReminderVariant::Anchor,
    ReminderVariant::Advance,
    ReminderVariant::Trigger,
];

fn completion_hint(task: &Task) -> String {
    format!("Reply \"@bot done #{}\" once finished.", task.id)
}

fn description_block(task: &Task) -> String {
    match task.description.as_deref() {
        Some(text) if !text.trim().is_empty() => format!("{}\n\n", text.trim()),
        _ => String::new(),
    }
}

/// Members must check in before a daily deadline; reminders target only
/// those who have not yet done so today
pub struct DeadlineStrategy;

#[async_trait]
impl KindStrategy for DeadlineStrategy {
    fn variants(&self) -> &'static [ReminderVariant] {
        &ALL_VARIANTS
    }

    fn derive(
        &self,
        deriver: &TimeExpressionDeriver,
        task: &Task,
        variant: ReminderVariant,
        _now: &DateTime<Tz>,
    ) -> Result<Option<DerivedExpression>, ScheduleError> {
        Ok(match variant {
            ReminderVariant::Anchor => Some(deriver.anchor()),
            ReminderVariant::Advance => deriver.advance_before_deadline(task),
            ReminderVariant::Trigger => deriver.deadline(task),
        })
    }

    async fn resolve_audience(
        &self,
        ledger: &CompletionLedger,
        task: &Task,
        day: NaiveDate,
    ) -> Result<Vec<PersonId>, StorageError> {
        Ok(ledger
            .incomplete_members(task, day)
            .await?
            .into_iter()
            .collect())
    }

    fn render(
        &self,
        task: &Task,
        variant: ReminderVariant,
        audience: &[PersonId],
        fired_at: &DateTime<Tz>,
    ) -> ReminderMessage {
        let deadline = task
            .deadline_time
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        let (title, status) = match variant {
            ReminderVariant::Anchor => (
                "Morning reminder".to_string(),
                format!("Due today by {}", deadline),
            ),
            ReminderVariant::Advance => (
                "Advance reminder".to_string(),
                format!(
                    "{} minutes left, due at {}",
                    task.advance_minutes, deadline
                ),
            ),
            ReminderVariant::Trigger => match task.deadline_time {
                Some(due) if fired_at.time() > due => (
                    "Overdue report".to_string(),
                    "**The deadline has passed, please finish as soon as possible**".to_string(),
                ),
                _ => (
                    "Deadline reminder".to_string(),
                    format!("Deadline reached: {}", deadline),
                ),
            },
        };

        let body = format!(
            "### {}\n\nTask: **{}** (#{})\n{}\nStill pending: **{}**\n\n{}{}",
            title,
            task.name,
            task.id,
            status,
            audience.len(),
            description_block(task),
            completion_hint(task),
        );

        ReminderMessage { title, body }
    }
}

/// Plain heads-up for the whole group; nobody checks in
pub struct NotificationStrategy;

#[async_trait]
impl KindStrategy for NotificationStrategy {
    fn variants(&self) -> &'static [ReminderVariant] {
        &ALL_VARIANTS
    }

    fn derive(
        &self,
        deriver: &TimeExpressionDeriver,
        task: &Task,
        variant: ReminderVariant,
        now: &DateTime<Tz>,
    ) -> Result<Option<DerivedExpression>, ScheduleError> {
        Ok(Some(match variant {
            ReminderVariant::Anchor => deriver.anchor(),
            ReminderVariant::Advance => deriver.advance_before_trigger(task, now)?,
            ReminderVariant::Trigger => deriver.trigger(task),
        }))
    }

    async fn resolve_audience(
        &self,
        ledger: &CompletionLedger,
        task: &Task,
        _day: NaiveDate,
    ) -> Result<Vec<PersonId>, StorageError> {
        ledger.members(task).await
    }

    fn render(
        &self,
        task: &Task,
        variant: ReminderVariant,
        _audience: &[PersonId],
        fired_at: &DateTime<Tz>,
    ) -> ReminderMessage {
        let status = match variant {
            ReminderVariant::Anchor => "Scheduled for today".to_string(),
            ReminderVariant::Advance => format!(
                "Starting at {}",
                (*fired_at + chrono::Duration::minutes(i64::from(task.advance_minutes)))
                    .format("%H:%M")
            ),
            ReminderVariant::Trigger => format!("Now: {}", fired_at.format("%H:%M")),
        };

        let body = format!(
            "### Reminder\n\n**{}** (#{})\n{}\n\n{}",
            task.name,
            task.id,
            status,
            description_block(task),
        );

        ReminderMessage {
            title: task.name.clone(),
            body: body.trim_end().to_string(),
        }
    }
}

/// Kind-keyed lookup of strategies
pub struct StrategyTable {
    strategies: HashMap<TaskKind, Arc<dyn KindStrategy>>,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::empty()
            .register(TaskKind::Deadline, Arc::new(DeadlineStrategy))
            .register(TaskKind::Notification, Arc::new(NotificationStrategy))
    }
}

impl StrategyTable {
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    pub fn register(mut self, kind: TaskKind, strategy: Arc<dyn KindStrategy>) -> Self {
        self.strategies.insert(kind, strategy);
        self
    }

    pub fn get(&self, kind: TaskKind) -> Option<&Arc<dyn KindStrategy>> {
        self.strategies.get(&kind)
    }

    /// Validate the base schedule, then derive every variant the task's kind
    /// owns. Variants the task cannot support are left out.
    pub fn derive_all(
        &self,
        task: &Task,
        deriver: &TimeExpressionDeriver,
        now: &DateTime<Tz>,
    ) -> Result<Vec<DerivedExpression>, ScheduleError> {
        parse_cron_expression(&task.cron_expr)?;

        let Some(strategy) = self.get(task.kind) else {
            warn!(task_id = task.id, kind = %task.kind, "No strategy registered for task kind");
            return Ok(Vec::new());
        };

        let mut derived = Vec::with_capacity(strategy.variants().len());
        for &variant in strategy.variants() {
            match strategy.derive(deriver, task, variant, now)? {
                Some(expression) => derived.push(expression),
                None => warn!(
                    task_id = task.id,
                    task_name = %task.name,
                    variant = %variant,
                    "Task has no deadline, skipping variant"
                ),
            }
        }
        Ok(derived)
    }
}
