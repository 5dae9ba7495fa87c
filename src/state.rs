use std::sync::Arc;

use agentcal_core::CalendarService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    service: Arc<CalendarService>,
}

impl AppState {
    pub fn new(service: Arc<CalendarService>) -> Self {
        AppState { service }
    }

    pub fn service(&self) -> &CalendarService {
        &self.service
    }
}
