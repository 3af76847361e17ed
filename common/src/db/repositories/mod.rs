// Repository layer for database operations

pub mod completion;
pub mod firing;
pub mod queries;
pub mod roster;
pub mod task;

pub use completion::CompletionRepository;
pub use firing::FiringRepository;
pub use roster::RosterRepository;
pub use task::TaskRepository;
