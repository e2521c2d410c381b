//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::service::LifecycleManager;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Lifecycle manager owning sessions, fan-out and typing debounce.
    pub lifecycle: Arc<LifecycleManager>,
    /// Configuration the relay was started with.
    pub config: Arc<RelayConfig>,
}

impl AppState {
    /// Builds the relay core from `config`.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            lifecycle: Arc::new(LifecycleManager::new(&config)),
            config: Arc::new(config),
        }
    }
}
