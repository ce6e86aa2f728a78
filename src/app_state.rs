use std::sync::Arc;

use crate::db::JobStore;
use crate::services::orchestrator::JobOrchestrator;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: JobOrchestrator,
    pub store: Arc<dyn JobStore>,
}

impl AppState {
    pub fn new(orchestrator: JobOrchestrator) -> Self {
        let store = Arc::clone(orchestrator.store());
        Self { orchestrator, store }
    }
}
