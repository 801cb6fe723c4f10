//! Application state shared across routes

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::server::ServerStats;
use crate::ws::channel::EventChannel;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Hands new client channels to the scheduler
    pub intake: mpsc::UnboundedSender<EventChannel>,
    /// Counters the scheduler publishes every tick
    pub stats: Arc<ServerStats>,
}

impl AppState {
    pub fn new(
        config: Config,
        intake: mpsc::UnboundedSender<EventChannel>,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            intake,
            stats,
        }
    }
}
