//! The config file on disk: where it lives, how it is read, and the
//! commented template written the first time the relay starts.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use termbridge_common::ConfigError;
use tracing::info;

use crate::schema::{RelayConfig, CONFIG_SCHEMA_VERSION};

/// `<platform config dir>/termbridge/relay.toml`.
pub fn default_path() -> Result<PathBuf, ConfigError> {
    let dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::ParseError("could not determine config directory".into()))?;
    Ok(dir.join("termbridge").join("relay.toml"))
}

/// Parse the file at `path`. Missing fields take their defaults; values are
/// checked by [`crate::validation`], not here.
pub fn read(path: &Path) -> Result<RelayConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
        _ => ConfigError::ParseError(format!("failed to read {}: {e}", path.display())),
    })?;

    let config = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Like [`read`], but a missing file is replaced by the template and the
/// defaults are returned.
pub fn read_or_init(path: &Path) -> Result<RelayConfig, ConfigError> {
    match read(path) {
        Err(ConfigError::FileNotFound(_)) => {
            write_template(path)?;
            Ok(RelayConfig::default())
        }
        other => other,
    }
}

/// Write the commented template to `path`, creating parent directories.
pub fn write_template(path: &Path) -> Result<(), ConfigError> {
    let write_err = |e: std::io::Error| {
        ConfigError::ParseError(format!("failed to write {}: {e}", path.display()))
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(path, template()).map_err(write_err)?;
    info!("wrote default config to {}", path.display());
    Ok(())
}

/// Default config with every setting commented out.
pub fn template() -> String {
    format!("# termbridge relay configuration\n# Schema version {CONFIG_SCHEMA_VERSION}\n{BODY}")
}

const BODY: &str = r##"# Only override what you want to change -- missing fields use defaults.

[server]
# bind = "0.0.0.0"
# port = 8080                  # 1-65535
# upgrade_timeout_secs = 10    # 1-120

[auth]
# Shared with the login service that mints device credentials.
# Must be at least 16 characters. TERMBRIDGE_TOKEN_SECRET overrides it.
# token_secret = ""
# login_url = "http://localhost:8080/auth/login"
# identities = ["user-1"]

[handshake]
# Unfinished pairing attempts are reverted after this many seconds.
# timeout_secs = 30            # 1-600

[logging]
# trace | debug | info | warn | error
# level = "info"
"##;
