//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::matchmaking::Matchmaker;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<MatchRegistry>,
    pub matchmaker: Arc<Matchmaker>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(MatchRegistry::new());
        let matchmaker = Arc::new(Matchmaker::new(registry.clone(), config.clone()));

        Self {
            config,
            registry,
            matchmaker,
        }
    }
}
