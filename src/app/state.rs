//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::{Dispatcher, GameServer};
use crate::util::time::{Clock, SystemClock};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub game_server: Arc<GameServer>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        let config = Arc::new(config);

        // Initialize dispatcher and its scheduler handle
        let dispatcher = Dispatcher::new(config.game.clone(), clock);
        let game_server = Arc::new(GameServer::new(dispatcher));

        Self {
            config,
            game_server,
        }
    }
}
