//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::SessionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let sessions = Arc::new(SessionRegistry::new(config.engine_config(), config.rng_seed));

        Self {
            config: Arc::new(config),
            sessions,
        }
    }
}
