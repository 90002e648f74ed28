//! Full configuration validation.
//!
//! Each section has its own check; this orchestrator calls them all and
//! collects errors into a single `ConfigError`.


use crate::schema::RelayConfig;
use termbridge_common::ConfigError;

/// Minimum accepted length for `auth.token_secret`.
pub const MIN_TOKEN_SECRET_LEN: usize = 16;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &RelayConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_server(&mut errors, config);
    validate_auth(&mut errors, config);
    validate_range(
        &mut errors,
        "handshake.timeout_secs",
        config.handshake.timeout_secs,
        1,
        600,
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_server(errors: &mut Vec<String>, config: &RelayConfig) {
    if config.server.bind.trim().is_empty() {
        errors.push("server.bind must not be empty".into());
    }
    validate_range(errors, "server.port", u32::from(config.server.port), 1, 65535);
    validate_range(
        errors,
        "server.upgrade_timeout_secs",
        config.server.upgrade_timeout_secs,
        1,
        120,
    );
}

fn validate_auth(errors: &mut Vec<String>, config: &RelayConfig) {
    if config.auth.token_secret.len() < MIN_TOKEN_SECRET_LEN {
        errors.push(format!(
            "auth.token_secret must be at least {MIN_TOKEN_SECRET_LEN} characters"
        ));
    }
    if !(config.auth.login_url.starts_with("http://")
        || config.auth.login_url.starts_with("https://"))
    {
        errors.push(format!(
            "auth.login_url = {:?} must be an http(s) URL",
            config.auth.login_url
        ));
    }
    if config.auth.identities.iter().any(|id| id.trim().is_empty()) {
        errors.push("auth.identities must not contain empty entries".into());
    }
}

/// Push an error if `value` is outside `[min, max]`.
fn validate_range(errors: &mut Vec<String>, name: &str, value: u32, min: u32, max: u32) {
    if value < min || value > max {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}
