//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Playable area, in world units. Positions live in `[0, width] x [0, height]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldBounds {
    pub width: u32,
    pub height: u32,
}

/// Simulation settings shared by the dispatcher and every room
#[derive(Clone, Debug, PartialEq)]
pub struct GameConfig {
    /// Simulation steps per second
    pub tick_rate: u32,
    /// State broadcasts per second, per room
    pub snapshot_rate: u32,
    /// Room capacity used by first-fit assignment
    pub max_players_per_room: usize,
    pub world: WorldBounds,
    /// Player speed in units per second
    pub player_speed: f64,
}

impl GameConfig {
    /// Milliseconds between two simulation steps
    pub fn tick_interval_ms(&self) -> f64 {
        1000.0 / self.tick_rate as f64
    }

    /// Milliseconds between two snapshots of the same room
    pub fn snapshot_interval_ms(&self) -> f64 {
        1000.0 / self.snapshot_rate as f64
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30,
            snapshot_rate: 15,
            max_players_per_room: 8,
            world: WorldBounds {
                width: 1000,
                height: 600,
            },
            player_speed: 220.0,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed cross-origin hosts; empty allows every origin
    pub cors_origins: Vec<String>,
    /// Directory served for any path that is not an API route
    pub static_dir: PathBuf,

    pub game: GameConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from any key lookup.
    ///
    /// Numeric values that fail to parse fall back to their defaults. Only
    /// values that would leave the server unable to run are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = GameConfig::default();

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_or(lookup("PORT"), 3000);
        let server_addr = format!("{}:{}", host.trim(), port)
            .parse()
            .map_err(|_| ConfigError::InvalidAddress)?;

        let game = GameConfig {
            tick_rate: parse_or(lookup("TICK_RATE"), defaults.tick_rate),
            snapshot_rate: parse_or(lookup("SNAPSHOT_RATE"), defaults.snapshot_rate),
            max_players_per_room: parse_or(
                lookup("MAX_PLAYERS_PER_ROOM"),
                defaults.max_players_per_room,
            ),
            world: WorldBounds {
                width: parse_or(lookup("WORLD_WIDTH"), defaults.world.width),
                height: parse_or(lookup("WORLD_HEIGHT"), defaults.world.height),
            },
            player_speed: parse_or(lookup("PLAYER_SPEED"), defaults.player_speed),
        };

        if game.tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }
        if game.snapshot_rate == 0 {
            return Err(ConfigError::Invalid("SNAPSHOT_RATE"));
        }
        if game.max_players_per_room == 0 {
            return Err(ConfigError::Invalid("MAX_PLAYERS_PER_ROOM"));
        }
        if !game.player_speed.is_finite() {
            return Err(ConfigError::Invalid("PLAYER_SPEED"));
        }

        Ok(Self {
            server_addr,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            cors_origins: parse_list(lookup("CORS_ORIGINS")),
            static_dir: lookup("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("public")),
            game,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            log_level: "info".to_string(),
            cors_origins: Vec::new(),
            static_dir: PathBuf::from("public"),
            game: GameConfig::default(),
        }
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_list(raw: Option<String>) -> Vec<String> {
    raw.map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
