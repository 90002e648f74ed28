//! termbridge relay configuration.
//!
//! TOML-based configuration with full validation. All sections use sensible
//! defaults so partial configs work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use termbridge_config::load_config;
//!
//! let config = load_config(None).expect("failed to load config");
//! println!("listening on {}", config.server.addr());
//! ```

pub mod file;
pub mod schema;
pub mod validation;

// Re-export core types for convenience
pub use schema::{
    AuthConfig, HandshakeConfig, LogLevel, LoggingConfig, RelayConfig, ServerConfig,
    CONFIG_SCHEMA_VERSION,
};

use std::path::Path;

use termbridge_common::ConfigError;

/// Environment variable that overrides `auth.token_secret`.
pub const TOKEN_SECRET_ENV: &str = "TERMBRIDGE_TOKEN_SECRET";

/// Load, override from the environment, and validate.
///
/// With `path` set the file must exist; otherwise the platform default is
/// used and created on first run.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => file::read(path)?,
        None => file::read_or_init(&file::default_path()?)?,
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validation::validate(&config)?;
    Ok(config)
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides(config: &mut RelayConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(secret) = lookup(TOKEN_SECRET_ENV).filter(|s| !s.is_empty()) {
        tracing::debug!("auth.token_secret taken from {TOKEN_SECRET_ENV}");
        config.auth.token_secret = secret;
    }
}
