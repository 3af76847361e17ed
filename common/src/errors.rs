// Error types shared by the reminder engine and its collaborators

use sqlx::error::ErrorKind;
use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid time of day '{value}': {reason}")]
    InvalidTimeOfDay { value: String, reason: String },

    #[error("No next occurrence available for expression '{0}'")]
    NoNextOccurrence(String),

    #[error("Dispatcher is shut down")]
    DispatcherShutdown,
}

/// Failures of the PostgreSQL repositories, before they are folded into
/// `StorageError` at the store boundary
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Errors surfaced by the persistence collaborators
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Event channel closed: {0}")]
    EventChannelClosed(String),
}

/// Notification delivery errors
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Notification request failed: {0}")]
    RequestFailed(String),

    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid notification configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to sign notification request: {0}")]
    SigningFailed(String),
}

/// Reminder service lifecycle errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Failed to load tasks: {0}")]
    Storage(#[from] StorageError),

    #[error("Task {task_id} has an invalid schedule: {source}")]
    InvalidTask {
        task_id: i64,
        #[source]
        source: ScheduleError,
    },

    #[error("Reminder service is already running")]
    AlreadyRunning,
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionFailed(err.to_string())
            }
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match db_err.kind() {
                    ErrorKind::UniqueViolation => DatabaseError::DuplicateKey(message),
                    // e.g. a completion or firing for a task deleted meanwhile
                    ErrorKind::ForeignKeyViolation => DatabaseError::ForeignKeyViolation(message),
                    _ => DatabaseError::QueryFailed(message),
                }
            }
            other => DatabaseError::QueryFailed(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationFailed(err.to_string())
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<DatabaseError> for StorageError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(msg) => StorageError::NotFound(msg),
            other => StorageError::DatabaseError(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError::RequestFailed(err.to_string())
    }
}
