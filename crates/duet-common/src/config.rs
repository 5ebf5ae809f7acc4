//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > config.toml > defaults

use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG.get().expect("Config not initialized. Call duet_common::config::init() first.")
}

/// Initialize the global configuration from environment.
///
/// Should be called once at application startup, before any other code accesses config.
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        // Defaults
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("relay.session_buffer", 64)?
        .set_default("relay.max_frame_bytes", 65_536)?
        // Optional config file
        .add_source(config::File::with_name("config").required(false))
        // Environment variables (DUET__SERVER__PORT, DUET__TURN__USERNAME, etc.)
        .add_source(
            config::Environment::with_prefix("DUET")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub relay: RelaySettings,
    #[serde(default)]
    pub turn: TurnConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelaySettings {
    /// Outbound frames buffered per connected session before the relay
    /// starts dropping deliveries to that session.
    pub session_buffer: usize,
    /// Largest text frame accepted from a client.
    pub max_frame_bytes: usize,
}

/// Relay-server (TURN) credentials handed to clients by `GET /api/turn-config`.
///
/// Both fields must be set for the endpoint to answer; otherwise clients fall
/// back to STUN-only connectivity.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TurnConfig {
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl TurnConfig {
    /// The configured credential pair, if complete.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.credential) {
            (Some(u), Some(c)) if !u.is_empty() && !c.is_empty() => Some((u.clone(), c.clone())),
            _ => None,
        }
    }
}
