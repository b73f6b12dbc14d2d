use std::sync::Arc;

use foldserve_engine::JobExecutor;
use foldserve_events::EventBus;
use foldserve_registry::JobRegistry;

use crate::config::ServerConfig;

/// Shared application state handed to every service façade.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// The process-wide job registry.
    pub registry: Arc<JobRegistry>,
    /// Bounded executor driving jobs on the execution backend.
    pub executor: Arc<JobExecutor>,
    /// Centralized event bus for job lifecycle events.
    pub event_bus: Arc<EventBus>,
    /// Server configuration (validation caps, paths, ports).
    pub config: Arc<ServerConfig>,
}
