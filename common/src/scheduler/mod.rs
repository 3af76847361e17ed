// Scheduler module: reminder registration, dispatch and execution

pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod registry;
pub mod strategy;

pub use dispatcher::{Dispatcher, FireContext, FireHandler, JobHandle};
pub use engine::{Collaborators, ReminderService, Scheduler, ServiceConfig};
pub use executor::{FiringOutcome, FiringStage, ReminderExecutor};
pub use registry::{ReconcileReport, RegistrationOutcome, ReminderRegistry};
pub use strategy::{
    DeadlineStrategy, KindStrategy, NotificationStrategy, ReminderMessage, StrategyTable,
};
