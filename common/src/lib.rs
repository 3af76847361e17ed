// Common library for the reminder scheduling engine and its binaries

pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod telemetry;
