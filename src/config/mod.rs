//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

use crate::game::physics::BackendKind;
use crate::session::DEFAULT_SESSION_BUFFER;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS
    pub client_origin: String,
    /// Frames buffered per player before new ones are dropped
    pub session_buffer: usize,
    /// Loose balls spawned into the arena at startup
    pub ball_count: usize,
    /// Integrator behind the world (rapier or kinematic)
    pub physics_backend: BackendKind,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            session_buffer: parse_or("SESSION_BUFFER", DEFAULT_SESSION_BUFFER)?,
            ball_count: parse_or("BALL_COUNT", 0)?,

            physics_backend: parse_backend(env::var("PHYSICS_BACKEND").ok())?,
        })
    }
}

fn parse_or(key: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber(key)),
        Err(_) => Ok(default),
    }
}

fn parse_backend(raw: Option<String>) -> Result<BackendKind, ConfigError> {
    match raw {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidBackend(raw)),
        None => Ok(BackendKind::default()),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid number in environment variable: {0}")]
    InvalidNumber(&'static str),

    #[error("Unknown physics backend: {0}")]
    InvalidBackend(String),
}
