use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::notification::NotificationService;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub service: Arc<NotificationService>,
    pub mode: &'static str,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, service: Arc<NotificationService>, mode: &'static str) -> Self {
        Self {
            settings,
            service,
            mode,
            start_time: Instant::now(),
        }
    }
}
