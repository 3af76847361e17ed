// PostgreSQL pool shared by the task, completion, firing and roster repositories

use crate::config::DatabaseConfig;
use crate::errors::DatabaseError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Tables the reminder engine reads and writes
pub const REMINDER_TABLES: [&str; 4] = [
    "tasks",
    "completion_records",
    "reminder_logs",
    "group_members",
];

/// Cloneable handle over one `PgPool`; every repository holds a clone
#[derive(Debug, Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    /// Connect to the reminder database.
    ///
    /// # Errors
    /// Returns `DatabaseError::ConnectionFailed` when no connection can be
    /// acquired within `connect_timeout_seconds`
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .connect(&config.url)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to connect to reminder database");
                DatabaseError::ConnectionFailed(e.to_string())
            })?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Reminder database pool ready"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Reminder database health check failed");
                DatabaseError::HealthCheckFailed(e.to_string())
            })?;

        debug!("Reminder database reachable");
        Ok(())
    }

    /// Apply the embedded migrations under `migrations/`, then confirm every
    /// reminder table exists
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        self.verify_schema().await?;
        info!("Reminder schema up to date");
        Ok(())
    }

    /// Fails with the names of any reminder tables missing from the
    /// connected database
    #[instrument(skip(self))]
    pub async fn verify_schema(&self) -> Result<(), DatabaseError> {
        let present: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = ANY($1)",
        )
        .bind(&REMINDER_TABLES[..])
        .fetch_all(&self.pool)
        .await?;

        let missing = missing_tables(&present);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DatabaseError::MigrationFailed(format!(
                "missing tables: {}",
                missing.join(", ")
            )))
        }
    }

    /// Wait for checked-out connections to return, then close the pool
    #[instrument(skip(self))]
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Reminder database pool closed");
    }
}

fn missing_tables(present: &[String]) -> Vec<&'static str> {
    REMINDER_TABLES
        .iter()
        .copied()
        .filter(|table| !present.iter().any(|p| p == table))
        .collect()
}
