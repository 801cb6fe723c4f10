//! Connection registry and the scheduler that drives every match

pub mod connection;
pub mod scheduler;

pub use scheduler::{Scheduler, ServerStats};
