//! Configuration schema types for the relay.
//!
//! All structs use `serde(default)` so partial configs work correctly.

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub handshake: HandshakeConfig,
    pub logging: LoggingConfig,
}

// =============================================================================
// Server Config
// =============================================================================

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub bind: String,
    pub port: u16,
    /// Seconds a fresh socket may take to complete the WebSocket upgrade.
    pub upgrade_timeout_secs: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            upgrade_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

// =============================================================================
// Auth Config
// =============================================================================

/// Session credential settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC key shared with the login service that mints credentials.
    pub token_secret: String,
    /// Base URL of the login page; the device id is appended as a query.
    pub login_url: String,
    /// Identity records known to the relay.
    pub identities: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            login_url: "http://localhost:8080/auth/login".into(),
            identities: Vec::new(),
        }
    }
}

// =============================================================================
// Handshake Config
// =============================================================================

/// Pairing handshake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Seconds from `handshake:initiate` until an unfinished attempt is reverted.
    pub timeout_secs: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

// =============================================================================
// Logging Config
// =============================================================================

/// Log level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// `EnvFilter` directive for the relay's own crates.
    pub fn filter_directive(self) -> String {
        let level = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        format!("termbridge_relay={level},termbridge_config={level}")
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}
