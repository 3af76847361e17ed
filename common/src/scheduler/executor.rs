// Reminder executor: what happens when a job fires

use crate::ledger::CompletionLedger;
use crate::models::{ReminderFiring, ReminderVariant, Task};
use crate::notify::NotificationSink;
use crate::scheduler::dispatcher::FireContext;
use crate::scheduler::strategy::StrategyTable;
use crate::store::{FiringStore, TaskStore};
use crate::telemetry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Step at which a firing was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiringStage {
    Audience,
    Notify,
    Audit,
}

impl FiringStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FiringStage::Audience => "audience",
            FiringStage::Notify => "notify",
            FiringStage::Audit => "audit",
        }
    }
}

impl std::fmt::Display for FiringStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiringOutcome {
    Delivered { audience_size: usize },
    Abandoned { stage: FiringStage },
}

/// Resolves the audience, renders, sends, audits and updates bookkeeping.
///
/// No step is retried and nothing is rolled back: a failure while resolving,
/// sending or auditing abandons the firing; a bookkeeping failure is only
/// warned about since the reminder already went out.
pub struct ReminderExecutor {
    ledger: Arc<CompletionLedger>,
    sink: Arc<dyn NotificationSink>,
    firings: Arc<dyn FiringStore>,
    tasks: Arc<dyn TaskStore>,
    strategies: Arc<StrategyTable>,
}

impl ReminderExecutor {
    pub fn new(
        ledger: Arc<CompletionLedger>,
        sink: Arc<dyn NotificationSink>,
        firings: Arc<dyn FiringStore>,
        tasks: Arc<dyn TaskStore>,
        strategies: Arc<StrategyTable>,
    ) -> Self {
        Self {
            ledger,
            sink,
            firings,
            tasks,
            strategies,
        }
    }

    #[instrument(skip(self, task, ctx), fields(task_id = task.id, variant = %variant, fired_at = %ctx.fired_at))]
    pub async fn fire(
        &self,
        task: &Task,
        variant: ReminderVariant,
        ctx: &FireContext,
    ) -> FiringOutcome {
        let started = Instant::now();
        let outcome = self.execute(task, variant, ctx).await;
        telemetry::record_fire_duration(variant, started.elapsed().as_secs_f64());

        match outcome {
            FiringOutcome::Delivered { audience_size } => {
                telemetry::record_firing_delivered(task.id, variant, audience_size)
            }
            FiringOutcome::Abandoned { stage } => {
                telemetry::record_firing_failed(task.id, variant, stage.as_str())
            }
        }
        outcome
    }

    async fn execute(
        &self,
        task: &Task,
        variant: ReminderVariant,
        ctx: &FireContext,
    ) -> FiringOutcome {
        let Some(strategy) = self.strategies.get(task.kind) else {
            error!(kind = %task.kind, "No strategy registered for task kind, abandoning firing");
            return FiringOutcome::Abandoned {
                stage: FiringStage::Audience,
            };
        };

        let day = ctx.fired_at.date_naive();
        let audience = match strategy.resolve_audience(&self.ledger, task, day).await {
            Ok(audience) => audience,
            Err(e) => {
                error!(error = %e, "Failed to resolve reminder audience, abandoning firing");
                return FiringOutcome::Abandoned {
                    stage: FiringStage::Audience,
                };
            }
        };

        let message = strategy.render(task, variant, &audience, &ctx.fired_at);

        if let Err(e) = self
            .sink
            .send(&task.group_id, &message.title, &message.body, &audience)
            .await
        {
            error!(
                group_id = %task.group_id,
                error = %e,
                "Failed to send reminder, abandoning firing"
            );
            return FiringOutcome::Abandoned {
                stage: FiringStage::Notify,
            };
        }

        let fired_at = ctx.fired_at.with_timezone(&Utc);
        let firing = ReminderFiring {
            task_id: task.id,
            group_id: task.group_id.clone(),
            variant,
            reminder_type: variant.label(task.kind).to_string(),
            message: message.body,
            audience_size: i32::try_from(audience.len()).unwrap_or(i32::MAX),
            fired_at,
        };

        if let Err(e) = self.firings.append(&firing).await {
            error!(error = %e, "Reminder sent but audit record could not be written");
            return FiringOutcome::Abandoned {
                stage: FiringStage::Audit,
            };
        }

        let next_run = ctx.next_run.map(|next| next.with_timezone(&Utc));
        if let Err(e) = self
            .tasks
            .update_run_bookkeeping(task.id, fired_at, next_run)
            .await
        {
            warn!(error = %e, "Failed to update task run bookkeeping");
        }

        info!(
            audience_size = audience.len(),
            reminder_type = %firing.reminder_type,
            "Reminder delivered"
        );
        FiringOutcome::Delivered {
            audience_size: audience.len(),
        }
    }
}
