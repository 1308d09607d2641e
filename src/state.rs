//! Shared application state.

use crate::config::Settings;
use crate::lifecycle::LifecycleManager;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: LifecycleManager,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let settings = Arc::new(settings);
        Self {
            lifecycle: LifecycleManager::new(settings.clone()),
            settings,
        }
    }
}
