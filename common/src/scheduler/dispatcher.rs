// Time-driven job dispatcher
//
// Every job runs on its own tokio task: sleep until the next occurrence of its
// cron expression, then await the handler. Stop and shutdown signals are only
// observed while sleeping, so a firing that has started always runs to
// completion and a job never overlaps itself. A job's task removes its own
// entry from the job table when it exits; stopping a job never waits on it.

use crate::clock::Clock;
use crate::errors::ScheduleError;
use crate::models::JobKey;
use crate::schedule::parse_cron_expression;
use crate::telemetry;
use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a handler learns about the firing it is asked to perform
#[derive(Debug, Clone, PartialEq)]
pub struct FireContext {
    pub key: JobKey,
    /// The scheduled occurrence being fired, or "now" for out-of-schedule firings
    pub fired_at: DateTime<Tz>,
    /// The occurrence after this one, when known
    pub next_run: Option<DateTime<Tz>>,
}

/// Work performed at each occurrence of a job
#[async_trait]
pub trait FireHandler: Send + Sync {
    async fn fire(&self, ctx: FireContext);
}

type JobTable = Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>;

fn lock_jobs(jobs: &JobTable) -> MutexGuard<'_, HashMap<Uuid, JoinHandle<()>>> {
    jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs cron-driven jobs in the clock's timezone
pub struct Dispatcher {
    clock: Arc<dyn Clock>,
    jobs: JobTable,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_flag: AtomicBool,
}

impl Dispatcher {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
        Self {
            clock,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx,
            shutdown_flag: AtomicBool::new(false),
        }
    }

    /// Start a job firing `handler` at every occurrence of `expression`.
    ///
    /// Rejects malformed expressions and expressions with no future
    /// occurrence. Must be called from within a tokio runtime.
    pub fn schedule(
        &self,
        key: JobKey,
        expression: &str,
        handler: Arc<dyn FireHandler>,
    ) -> Result<JobHandle, ScheduleError> {
        let schedule = parse_cron_expression(expression)?;
        let first_run = schedule
            .after(&self.clock.now())
            .next()
            .ok_or_else(|| ScheduleError::NoNextOccurrence(expression.to_string()))?;

        // Subscribe before checking the flag so a concurrent shutdown is never missed
        let shutdown_rx = self.shutdown_tx.subscribe();
        if self.shutdown_flag.load(Ordering::SeqCst) {
            return Err(ScheduleError::DispatcherShutdown);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let id = Uuid::new_v4();

        let (inserted_tx, inserted_rx) = oneshot::channel();
        let join = tokio::spawn(run_job(
            JobSlot {
                id,
                key,
                jobs: self.jobs.clone(),
            },
            inserted_rx,
            schedule,
            first_run,
            self.clock.clone(),
            handler,
            stop_rx,
            shutdown_rx,
        ));

        let active = {
            let mut jobs = lock_jobs(&self.jobs);
            jobs.insert(id, join);
            jobs.len()
        };
        let _ = inserted_tx.send(());
        telemetry::set_active_jobs(active);

        debug!(
            job_id = %id,
            job_key = %key,
            expression,
            first_run = %first_run,
            "Job scheduled"
        );

        Ok(JobHandle {
            id,
            key,
            expression: expression.to_string(),
            first_run,
            stop_tx,
        })
    }

    /// Number of job tasks still running, including stopped jobs whose
    /// last firing has not returned yet
    pub fn job_count(&self) -> usize {
        lock_jobs(&self.jobs).len()
    }

    /// Signal every job and wait until all in-flight firings have drained.
    /// Later calls to `schedule` fail with `DispatcherShutdown`.
    pub async fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> =
            lock_jobs(&self.jobs).drain().map(|(_, join)| join).collect();
        let count = handles.len();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Job task ended abnormally during shutdown");
            }
        }

        telemetry::set_active_jobs(0);
        info!(jobs = count, "Dispatcher drained");
    }
}

/// Owner's grip on one scheduled job. Dropping it also ends the job at its
/// next wake-up.
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    key: JobKey,
    expression: String,
    first_run: DateTime<Tz>,
    stop_tx: watch::Sender<bool>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> JobKey {
        self.key
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence computed when the job was scheduled
    pub fn first_run(&self) -> DateTime<Tz> {
        self.first_run
    }

    /// Prevent future firings. Returns at once; a firing already underway
    /// finishes on its own task and `Dispatcher::shutdown` still drains it.
    pub fn stop(self) {
        let _ = self.stop_tx.send(true);
        debug!(job_id = %self.id, job_key = %self.key, "Job stop signalled");
    }
}

/// A job task's own entry in the dispatcher's table, released when the task ends
struct JobSlot {
    id: Uuid,
    key: JobKey,
    jobs: JobTable,
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        let remaining = {
            let mut jobs = lock_jobs(&self.jobs);
            jobs.remove(&self.id);
            jobs.len()
        };
        telemetry::set_active_jobs(remaining);
        debug!(job_id = %self.id, job_key = %self.key, "Job task exited");
    }
}

async fn run_job(
    slot: JobSlot,
    inserted: oneshot::Receiver<()>,
    schedule: CronSchedule,
    first_run: DateTime<Tz>,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn FireHandler>,
    mut stop_rx: watch::Receiver<bool>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    // The slot must not release an entry the dispatcher has yet to insert
    let _ = inserted.await;

    let key = slot.key;
    let mut next = first_run;

    loop {
        let wait = (next - clock.now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let following = schedule.after(&next).next();
        handler
            .fire(FireContext {
                key,
                fired_at: next,
                next_run: following,
            })
            .await;

        // Occurrences missed while the handler ran are skipped, not replayed
        let now = clock.now();
        let base = if now > next { now } else { next };
        match schedule.after(&base).next() {
            Some(occurrence) => next = occurrence,
            None => {
                info!(job_key = %key, "Schedule exhausted, job finished");
                break;
            }
        }
    }
}
