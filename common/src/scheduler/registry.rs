// Reminder registry: which tasks own which live jobs

use crate::clock::Clock;
use crate::errors::ScheduleError;
use crate::models::{JobKey, ReminderVariant, SchedulingFingerprint, Task, TaskId};
use crate::schedule::{DerivedExpression, TimeExpressionDeriver};
use crate::scheduler::dispatcher::{Dispatcher, FireContext, FireHandler, JobHandle};
use crate::scheduler::executor::ReminderExecutor;
use crate::scheduler::strategy::StrategyTable;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

/// Result of `ReminderRegistry::register_task`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// A new job set was created; `jobs` variants were accepted by the dispatcher
    Registered { jobs: usize },
    /// The task already owns a job set; nothing changed
    AlreadyRegistered,
    /// The task is not active
    Skipped,
}

/// Changes applied by one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub registered: Vec<TaskId>,
    pub unregistered: Vec<TaskId>,
    pub reregistered: Vec<TaskId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty() && self.unregistered.is_empty() && self.reregistered.is_empty()
    }
}

struct RegisteredTask {
    fingerprint: SchedulingFingerprint,
    jobs: Vec<JobHandle>,
}

/// Fires one variant of a task snapshot through the executor
struct VariantJob {
    executor: Arc<ReminderExecutor>,
    task: Task,
    variant: ReminderVariant,
}

#[async_trait]
impl FireHandler for VariantJob {
    async fn fire(&self, ctx: FireContext) {
        self.executor.fire(&self.task, self.variant, &ctx).await;
    }
}

/// Maps each registered task to its set of dispatcher jobs.
///
/// Registering a task that already owns a job set is a no-op: the check and
/// the insert happen under the same lock, so concurrent registrations of one
/// task still yield exactly one job set. Edits are picked up by `reconcile`.
pub struct ReminderRegistry {
    dispatcher: Arc<Dispatcher>,
    executor: Arc<ReminderExecutor>,
    strategies: Arc<StrategyTable>,
    deriver: TimeExpressionDeriver,
    clock: Arc<dyn Clock>,
    tasks: Mutex<HashMap<TaskId, RegisteredTask>>,
}

impl ReminderRegistry {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        executor: Arc<ReminderExecutor>,
        strategies: Arc<StrategyTable>,
        deriver: TimeExpressionDeriver,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dispatcher,
            executor,
            strategies,
            deriver,
            clock,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Derive the task's variants and schedule one job per variant.
    ///
    /// A malformed base schedule fails the whole registration. A variant the
    /// dispatcher rejects is logged and skipped; the others still register.
    #[instrument(skip(self, task), fields(task_id = task.id, task_name = %task.name))]
    pub async fn register_task(&self, task: &Task) -> Result<RegistrationOutcome, ScheduleError> {
        if !task.is_active() {
            debug!(status = %task.status, "Task is not active, skipping registration");
            return Ok(RegistrationOutcome::Skipped);
        }

        let mut table = self.tasks.lock().await;
        if table.contains_key(&task.id) {
            debug!("Task already registered");
            return Ok(RegistrationOutcome::AlreadyRegistered);
        }

        let derived = self
            .strategies
            .derive_all(task, &self.deriver, &self.clock.now())?;
        let jobs = self.schedule_jobs(task, derived);
        let count = jobs.len();

        table.insert(
            task.id,
            RegisteredTask {
                fingerprint: task.scheduling_fingerprint(),
                jobs,
            },
        );

        info!(jobs = count, kind = %task.kind, "Task registered");
        Ok(RegistrationOutcome::Registered { jobs: count })
    }

    fn schedule_jobs(&self, task: &Task, derived: Vec<DerivedExpression>) -> Vec<JobHandle> {
        let mut jobs = Vec::with_capacity(derived.len());
        for expression in derived {
            let key = JobKey::new(task.id, expression.variant);
            let handler = Arc::new(VariantJob {
                executor: self.executor.clone(),
                task: task.clone(),
                variant: expression.variant,
            });

            match self
                .dispatcher
                .schedule(key, &expression.expression, handler)
            {
                Ok(handle) => {
                    debug!(
                        job_key = %key,
                        expression = %expression.expression,
                        degraded = expression.degraded,
                        "Variant scheduled"
                    );
                    jobs.push(handle);
                }
                Err(e) => {
                    error!(
                        job_key = %key,
                        expression = %expression.expression,
                        error = %e,
                        "Dispatcher rejected variant, skipping"
                    );
                }
            }
        }
        jobs
    }

    /// Remove the task's job set. Returns false when the task was not
    /// registered. No later firing starts; one already underway finishes on
    /// its own without holding up the caller.
    #[instrument(skip(self))]
    pub async fn unregister_task(&self, task_id: TaskId) -> bool {
        let removed = self.tasks.lock().await.remove(&task_id);
        match removed {
            Some(registered) => {
                let count = registered.jobs.len();
                stop_jobs(registered.jobs);
                info!(jobs = count, "Task unregistered");
                true
            }
            None => false,
        }
    }

    /// Fire the Anchor variant right away when today's anchor time has
    /// already passed, so a task created late in the day still gets its first
    /// reminder. Returns whether a firing was made.
    ///
    /// Skipped when the task's own Anchor job was scheduled for today, i.e.
    /// the task was registered before the anchor time.
    #[instrument(skip(self, task), fields(task_id = task.id))]
    pub async fn catch_up(&self, task: &Task) -> bool {
        if !task.is_active() {
            return false;
        }

        let owns_anchor = self
            .strategies
            .get(task.kind)
            .map(|strategy| strategy.variants().contains(&ReminderVariant::Anchor))
            .unwrap_or(false);
        if !owns_anchor {
            return false;
        }

        let now = self.clock.now();
        if now.time() < self.deriver.anchor_time() {
            debug!("Anchor time not reached yet, no catch-up needed");
            return false;
        }

        let anchor_run = {
            let table = self.tasks.lock().await;
            table.get(&task.id).and_then(|registered| {
                registered
                    .jobs
                    .iter()
                    .find(|job| job.key().variant == ReminderVariant::Anchor)
                    .map(JobHandle::first_run)
            })
        };
        if matches!(anchor_run, Some(run) if run.date_naive() == now.date_naive()) {
            debug!("Anchor job already covers today, no catch-up needed");
            return false;
        }

        let ctx = FireContext {
            key: JobKey::new(task.id, ReminderVariant::Anchor),
            fired_at: now,
            next_run: anchor_run,
        };
        let outcome = self
            .executor
            .fire(task, ReminderVariant::Anchor, &ctx)
            .await;
        info!(outcome = ?outcome, "Catch-up anchor reminder fired");
        true
    }

    /// Bring the live job sets in line with `active_tasks`, the current
    /// persisted set of active tasks. Registered tasks missing from it are
    /// unregistered, tasks whose scheduling fields changed are re-registered
    /// and unseen tasks are registered. New tasks get no catch-up here.
    #[instrument(skip(self, active_tasks), fields(active = active_tasks.len()))]
    pub async fn reconcile(&self, active_tasks: &[Task]) -> ReconcileReport {
        let active: HashMap<TaskId, &Task> = active_tasks
            .iter()
            .filter(|task| task.is_active())
            .map(|task| (task.id, task))
            .collect();

        let mut report = ReconcileReport::default();
        let mut to_stop = Vec::new();
        let (changed, unseen) = {
            let mut table = self.tasks.lock().await;

            let stale: Vec<TaskId> = table
                .keys()
                .filter(|id| !active.contains_key(*id))
                .copied()
                .collect();
            let changed: Vec<TaskId> = table
                .iter()
                .filter(|(id, registered)| {
                    active
                        .get(*id)
                        .is_some_and(|task| task.scheduling_fingerprint() != registered.fingerprint)
                })
                .map(|(id, _)| *id)
                .collect();
            let unseen: Vec<TaskId> = active
                .keys()
                .filter(|id| !table.contains_key(*id))
                .copied()
                .collect();

            for id in stale.iter().chain(changed.iter()) {
                if let Some(registered) = table.remove(id) {
                    to_stop.extend(registered.jobs);
                }
            }
            report.unregistered = stale;
            (changed, unseen)
        };

        stop_jobs(to_stop);

        for id in changed {
            if let Some(task) = active.get(&id) {
                match self.register_task(task).await {
                    Ok(RegistrationOutcome::Registered { .. }) => report.reregistered.push(id),
                    Ok(_) => {}
                    Err(e) => {
                        error!(task_id = id, error = %e, "Failed to re-register edited task")
                    }
                }
            }
        }

        for id in unseen {
            if let Some(task) = active.get(&id) {
                match self.register_task(task).await {
                    Ok(RegistrationOutcome::Registered { .. }) => report.registered.push(id),
                    Ok(_) => {}
                    Err(e) => error!(task_id = id, error = %e, "Failed to register task"),
                }
            }
        }

        report.registered.sort_unstable();
        report.unregistered.sort_unstable();
        report.reregistered.sort_unstable();

        if !report.is_empty() {
            info!(
                registered = ?report.registered,
                unregistered = ?report.unregistered,
                reregistered = ?report.reregistered,
                "Registry reconciled"
            );
        }
        report
    }

    pub async fn registered_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.tasks.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Live jobs owned by the task; 0 when not registered
    pub async fn job_count(&self, task_id: TaskId) -> usize {
        self.tasks
            .lock()
            .await
            .get(&task_id)
            .map(|registered| registered.jobs.len())
            .unwrap_or(0)
    }

    pub async fn is_registered(&self, task_id: TaskId) -> bool {
        self.tasks.lock().await.contains_key(&task_id)
    }

    /// Variants with a live job for the task
    pub async fn registered_variants(&self, task_id: TaskId) -> HashSet<ReminderVariant> {
        self.tasks
            .lock()
            .await
            .get(&task_id)
            .map(|registered| registered.jobs.iter().map(|job| job.key().variant).collect())
            .unwrap_or_default()
    }

    /// Expressions of the task's live jobs, by variant
    pub async fn job_expressions(&self, task_id: TaskId) -> HashMap<ReminderVariant, String> {
        self.tasks
            .lock()
            .await
            .get(&task_id)
            .map(|registered| {
                registered
                    .jobs
                    .iter()
                    .map(|job| (job.key().variant, job.expression().to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn stop_jobs(jobs: Vec<JobHandle>) {
    jobs.into_iter().for_each(JobHandle::stop);
}
