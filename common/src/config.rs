// Configuration management with layered configuration (file, env)

use crate::errors::ScheduleError;
use chrono::NaiveTime;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub notification: NotificationConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_run_migrations() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA zone every derived daily expression is evaluated in
    pub timezone: String,
    /// Daily anchor reminder shared by all tasks, `HH:MM`
    pub anchor_time: String,
    /// Period of the registry reconciliation pass
    pub reload_interval_seconds: u64,
}

impl SchedulerConfig {
    pub fn timezone(&self) -> Result<Tz, ScheduleError> {
        Tz::from_str(&self.timezone)
            .map_err(|_| ScheduleError::InvalidTimezone(self.timezone.clone()))
    }

    pub fn anchor_time(&self) -> Result<NaiveTime, ScheduleError> {
        NaiveTime::parse_from_str(&self.anchor_time, "%H:%M").map_err(|e| {
            ScheduleError::InvalidTimeOfDay {
                value: self.anchor_time.clone(),
                reason: e.to_string(),
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Group-robot webhook; reminders are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Signing secret for the webhook, if the robot requires signed requests
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        self.scheduler.timezone().map_err(|e| e.to_string())?;
        self.scheduler.anchor_time().map_err(|e| e.to_string())?;
        if self.scheduler.reload_interval_seconds == 0 {
            return Err("Scheduler reload_interval_seconds must be greater than 0".to_string());
        }

        if let Some(url) = &self.notification.webhook_url {
            if url.is_empty() {
                return Err("Notification webhook_url cannot be empty when set".to_string());
            }
        }
        if self.notification.webhook_secret.is_some() && self.notification.webhook_url.is_none()
        {
            return Err("Notification webhook_secret requires webhook_url".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/team_reminder".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
                run_migrations: true,
            },
            scheduler: SchedulerConfig {
                timezone: "Asia/Shanghai".to_string(),
                anchor_time: "10:00".to_string(),
                reload_interval_seconds: 300,
            },
            notification: NotificationConfig {
                webhook_url: None,
                webhook_secret: None,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
                tracing_endpoint: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_database_url() {
        let mut settings = Settings::default();
        settings.database.url = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_unknown_timezone() {
        let mut settings = Settings::default();
        settings.scheduler.timezone = "Mars/Olympus_Mons".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.contains("Invalid timezone"));
    }

    #[test]
    fn test_validation_catches_malformed_anchor_time() {
        let mut settings = Settings::default();
        settings.scheduler.anchor_time = "25:99".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_reload_interval() {
        let mut settings = Settings::default();
        settings.scheduler.reload_interval_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_secret_without_webhook() {
        let mut settings = Settings::default();
        settings.notification.webhook_secret = Some("SEC123".to_string());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_anchor_time_parses() {
        let settings = Settings::default();
        assert_eq!(
            settings.scheduler.anchor_time().unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_load_from_path_reads_default_toml() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("default.toml"),
            r#"
[database]
url = "postgresql://localhost/reminder_test"
max_connections = 4
min_connections = 1
connect_timeout_seconds = 5

[scheduler]
timezone = "Europe/Berlin"
anchor_time = "09:30"
reload_interval_seconds = 60

[notification]

[observability]
log_level = "debug"
metrics_port = 9100
"#,
        )
        .unwrap();

        let settings = Settings::load_from_path(temp_dir.path()).unwrap();
        assert_eq!(settings.scheduler.timezone, "Europe/Berlin");
        assert_eq!(settings.scheduler.reload_interval_seconds, 60);
        assert!(settings.database.run_migrations);
        assert!(settings.notification.webhook_url.is_none());
        assert!(settings.validate().is_ok());
    }
}
