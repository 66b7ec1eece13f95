use std::sync::Arc;
use std::time::Instant;

use foerderband_manager::LifecycleManager;

/// Shared state behind every handler.
pub struct AppState {
    pub manager: Arc<LifecycleManager>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(manager: Arc<LifecycleManager>) -> Self {
        Self {
            manager,
            started_at: Instant::now(),
        }
    }
}
