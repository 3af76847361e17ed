// Scheduler binary entry point

use anyhow::Context;
use common::clock::{Clock, SystemClock};
use common::config::Settings;
use common::db::repositories::{
    CompletionRepository, FiringRepository, RosterRepository, TaskRepository,
};
use common::db::DbPool;
use common::notify::{LogNotificationSink, NotificationSink, WebhookNotificationSink};
use common::scheduler::{Collaborators, ReminderService, Scheduler, ServiceConfig};
use common::store::task_event_channel;
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!("Starting team reminder scheduler");

    let timezone = settings.scheduler.timezone()?;
    let service_config = ServiceConfig::from_settings(&settings.scheduler)?;
    info!(
        timezone = %timezone,
        anchor_time = %service_config.anchor_time.format("%H:%M"),
        reload_interval_seconds = service_config.reload_interval.as_secs(),
        "Configuration loaded"
    );

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;
    db_pool.health_check().await?;
    if settings.database.run_migrations {
        db_pool
            .run_migrations()
            .await
            .context("Failed to apply database migrations")?;
    }

    let sink: Arc<dyn NotificationSink> = match &settings.notification.webhook_url {
        Some(url) => Arc::new(
            WebhookNotificationSink::new(url.clone(), settings.notification.webhook_secret.clone())
                .context("Failed to build webhook notification sink")?,
        ),
        None => {
            warn!("No webhook configured, reminders will only be logged");
            Arc::new(LogNotificationSink)
        }
    };

    // Task creations made through this process's repository reach the service
    // over this channel
    let (events_tx, events_rx) = task_event_channel();
    let collaborators = Collaborators {
        tasks: Arc::new(TaskRepository::new(db_pool.clone()).with_events(events_tx)),
        completions: Arc::new(CompletionRepository::new(db_pool.clone())),
        firings: Arc::new(FiringRepository::new(db_pool.clone())),
        roster: Arc::new(RosterRepository::new(db_pool.clone())),
        sink,
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(timezone));

    let service = Arc::new(ReminderService::assemble(
        service_config,
        collaborators,
        clock,
        events_rx,
    ));

    let service_for_shutdown = service.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        if let Err(e) = service_for_shutdown.stop().await {
            error!(error = %e, "Error during reminder service shutdown");
        }
    });

    let result = service.start().await;

    db_pool.close().await;
    telemetry::shutdown_tracer();

    match result {
        Ok(()) => {
            info!("Scheduler stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Reminder service failed");
            Err(e.into())
        }
    }
}
