//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::game::{Canvas, EngineConfig};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Logical canvas width the aim geometry maps onto
    pub canvas_width: f32,
    /// Logical canvas height
    pub canvas_height: f32,
    /// Round length override; the mode default applies when unset
    pub game_duration_secs: Option<u32>,
    /// Fixed RNG seed for reproducible target layouts
    pub rng_seed: Option<u64>,

    /// Allowed presentation origins for CORS (comma-separated). Any origin when unset.
    pub client_origin: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let canvas_width = parse_or("CANVAS_WIDTH", 1280.0_f32)?;
        let canvas_height = parse_or("CANVAS_HEIGHT", 720.0_f32)?;
        if !(canvas_width > 0.0 && canvas_height > 0.0) {
            return Err(ConfigError::Invalid("CANVAS_WIDTH/CANVAS_HEIGHT"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            canvas_width,
            canvas_height,
            game_duration_secs: parse_optional("GAME_DURATION_SECS")?,
            rng_seed: parse_optional("RNG_SEED")?,

            client_origin: env::var("CLIENT_ORIGIN").ok().filter(|s| !s.trim().is_empty()),
        })
    }

    /// Engine settings shared by every session
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            canvas: Canvas::new(self.canvas_width, self.canvas_height),
            duration_override_secs: self.game_duration_secs,
            ..EngineConfig::default()
        }
    }
}

fn parse_optional<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(None),
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    Ok(parse_optional(key)?.unwrap_or(default))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
