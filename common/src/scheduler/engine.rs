// Reminder service: startup load, creation events and periodic reconciliation

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::errors::{ScheduleError, ServiceError};
use crate::ledger::CompletionLedger;
use crate::notify::NotificationSink;
use crate::schedule::{parse_cron_expression, TimeExpressionDeriver};
use crate::scheduler::dispatcher::Dispatcher;
use crate::scheduler::executor::ReminderExecutor;
use crate::scheduler::registry::{ReconcileReport, RegistrationOutcome, ReminderRegistry};
use crate::scheduler::strategy::StrategyTable;
use crate::store::{
    CompletionStore, FiringStore, RosterDirectory, TaskEvent, TaskEventReceiver, TaskStore,
};
use async_trait::async_trait;
use chrono::NaiveTime;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Runtime knobs of the reminder service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// How often persisted tasks are re-read and diffed against live jobs
    pub reload_interval: Duration,
    /// Daily anchor reminder time shared by every task
    pub anchor_time: NaiveTime,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            reload_interval: Duration::from_secs(300),
            anchor_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_settings(settings: &SchedulerConfig) -> Result<Self, ScheduleError> {
        Ok(Self {
            reload_interval: Duration::from_secs(settings.reload_interval_seconds),
            anchor_time: settings.anchor_time()?,
        })
    }
}

/// Persistence and delivery collaborators the service is wired to
#[derive(Clone)]
pub struct Collaborators {
    pub tasks: Arc<dyn TaskStore>,
    pub completions: Arc<dyn CompletionStore>,
    pub firings: Arc<dyn FiringStore>,
    pub roster: Arc<dyn RosterDirectory>,
    pub sink: Arc<dyn NotificationSink>,
}

/// Scheduler lifecycle
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Load and register persisted tasks, then serve creation events and the
    /// reload tick until `stop` is called. Returns after every in-flight
    /// firing has drained.
    async fn start(&self) -> Result<(), ServiceError>;

    /// Signal shutdown and wait for in-flight firings to finish
    async fn stop(&self) -> Result<(), ServiceError>;
}

pub struct ReminderService {
    config: ServiceConfig,
    tasks: Arc<dyn TaskStore>,
    ledger: Arc<CompletionLedger>,
    registry: Arc<ReminderRegistry>,
    dispatcher: Arc<Dispatcher>,
    events: Mutex<Option<TaskEventReceiver>>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_flag: AtomicBool,
}

impl ReminderService {
    /// Wire ledger, executor, dispatcher and registry over `collaborators`
    pub fn assemble(
        config: ServiceConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        events: TaskEventReceiver,
    ) -> Self {
        let strategies = Arc::new(StrategyTable::default());
        let ledger = Arc::new(CompletionLedger::new(
            collaborators.completions,
            collaborators.roster,
            clock.clone(),
        ));
        let executor = Arc::new(ReminderExecutor::new(
            ledger.clone(),
            collaborators.sink,
            collaborators.firings,
            collaborators.tasks.clone(),
            strategies.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(clock.clone()));
        let registry = Arc::new(ReminderRegistry::new(
            dispatcher.clone(),
            executor,
            strategies,
            TimeExpressionDeriver::new(config.anchor_time),
            clock,
        ));
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Self {
            config,
            tasks: collaborators.tasks,
            ledger,
            registry,
            dispatcher,
            events: Mutex::new(Some(events)),
            shutdown_tx,
            shutdown_flag: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<ReminderRegistry> {
        &self.registry
    }

    /// Ledger used for check-ins and day statistics
    pub fn ledger(&self) -> &Arc<CompletionLedger> {
        &self.ledger
    }

    /// Load active tasks and register them. Every base schedule is validated
    /// first; one malformed schedule fails startup before any job exists.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<usize, ServiceError> {
        let active = self.tasks.list_active().await?;

        for task in &active {
            parse_cron_expression(&task.cron_expr).map_err(|source| {
                ServiceError::InvalidTask {
                    task_id: task.id,
                    source,
                }
            })?;
        }

        let mut registered = 0;
        for task in &active {
            match self.registry.register_task(task).await {
                Ok(RegistrationOutcome::Registered { .. }) => registered += 1,
                Ok(_) => {}
                Err(e) => error!(task_id = task.id, error = %e, "Failed to register task"),
            }
        }

        info!(
            active_tasks = active.len(),
            registered_tasks = registered,
            "Persisted tasks registered"
        );
        Ok(registered)
    }

    /// React to a task store change
    #[instrument(skip(self, event))]
    pub async fn handle_event(&self, event: TaskEvent) {
        match event {
            TaskEvent::Created(task) => {
                match self.registry.register_task(&task).await {
                    Ok(RegistrationOutcome::Skipped) => return,
                    Ok(outcome) => {
                        debug!(task_id = task.id, outcome = ?outcome, "New task registered")
                    }
                    Err(e) => {
                        error!(
                            task_id = task.id,
                            task_name = %task.name,
                            error = %e,
                            "Rejected new task with invalid schedule"
                        );
                        return;
                    }
                }
                self.registry.catch_up(&task).await;
            }
        }
    }

    /// Re-read active tasks and reconcile the registry against them
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<ReconcileReport, ServiceError> {
        let active = self.tasks.list_active().await?;
        Ok(self.registry.reconcile(&active).await)
    }

    /// Serve creation events and reload ticks until shutdown, then drain
    pub async fn run(&self) -> Result<(), ServiceError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut events = self
            .events
            .lock()
            .await
            .take()
            .ok_or(ServiceError::AlreadyRunning)?;

        let period = self.config.reload_interval;
        let mut reload_tick = interval_at(Instant::now() + period, period);
        reload_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        info!(
            reload_interval_seconds = period.as_secs(),
            "Reminder service running"
        );

        if !self.shutdown_flag.load(Ordering::SeqCst) {
            loop {
                tokio::select! {
                    event = events.recv(), if events_open => match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!("Task event channel closed, new tasks will only be picked up by reload");
                            events_open = false;
                        }
                    },
                    _ = reload_tick.tick() => {
                        if let Err(e) = self.reload().await {
                            error!(error = %e, "Periodic reload failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown signal received, stopping reminder service");
                        break;
                    }
                }
            }
        }

        self.dispatcher.shutdown().await;
        info!("Reminder service stopped");
        Ok(())
    }
}

#[async_trait]
impl Scheduler for ReminderService {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), ServiceError> {
        self.initialize().await?;
        self.run().await
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), ServiceError> {
        info!("Stopping reminder service");
        self.shutdown_flag.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        self.dispatcher.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::memory::MemoryStore;
    use crate::models::{NewTask, Task, TaskKind, TaskStatus};
    use crate::notify::LogNotificationSink;
    use crate::store::task_event_channel;
    use chrono::Utc;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::at_local(chrono_tz::Asia::Shanghai, 2024, 3, 4, 9, 0).unwrap())
    }

    fn collaborators(store: &Arc<MemoryStore>) -> Collaborators {
        Collaborators {
            tasks: store.clone(),
            completions: store.clone(),
            firings: store.clone(),
            roster: store.clone(),
            sink: Arc::new(LogNotificationSink),
        }
    }

    fn stored_task(id: i64, cron_expr: &str) -> Task {
        Task {
            id,
            name: format!("task {}", id),
            description: None,
            kind: TaskKind::Notification,
            cron_expr: cron_expr.to_string(),
            deadline_time: None,
            advance_minutes: 10,
            group_id: "cid-1".to_string(),
            creator_id: None,
            status: TaskStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_run_at: None,
            next_run_at: None,
        }
    }

    #[tokio::test]
    async fn test_malformed_startup_schedule_registers_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.insert_task(stored_task(1, "0 0 9 * * *"));
        store.insert_task(stored_task(2, "nine o'clock"));

        let (_tx, rx) = task_event_channel();
        let service =
            ReminderService::assemble(ServiceConfig::default(), collaborators(&store), clock(), rx);

        let err = service.initialize().await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTask { task_id: 2, .. }));
        assert!(service.registry().registered_task_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let (_tx, rx) = task_event_channel();
        let service = Arc::new(ReminderService::assemble(
            ServiceConfig::default(),
            collaborators(&store),
            clock(),
            rx,
        ));

        let runner = {
            let service = service.clone();
            tokio::spawn(async move { service.run().await })
        };
        tokio::task::yield_now().await;

        service.stop().await.unwrap();
        runner.await.unwrap().unwrap();
        assert!(matches!(
            service.run().await,
            Err(ServiceError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn test_created_event_registers_task() {
        let (tx, rx) = task_event_channel();
        let store = Arc::new(MemoryStore::with_events(tx));
        let service = Arc::new(ReminderService::assemble(
            ServiceConfig::default(),
            collaborators(&store),
            clock(),
            rx,
        ));
        let runner = {
            let service = service.clone();
            tokio::spawn(async move { service.start().await })
        };

        let task = store
            .create(NewTask {
                name: "weekly sync".to_string(),
                description: None,
                kind: TaskKind::Notification,
                cron_expr: "0 0 15 * * *".to_string(),
                deadline_time: None,
                advance_minutes: 15,
                group_id: "cid-1".to_string(),
                creator_id: None,
            })
            .await
            .unwrap();

        let mut registered = false;
        for _ in 0..100 {
            if service.registry().is_registered(task.id).await {
                registered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registered);
        assert_eq!(service.registry().job_count(task.id).await, 3);

        service.stop().await.unwrap();
        runner.await.unwrap().unwrap();
    }
}
