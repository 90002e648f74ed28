use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid key length: {0}")]
    InvalidKeyLength(String),
}

/// Failures raised while handling one relay event.
///
/// Every variant is local to the connection that triggered it; the
/// connection layer turns them into outbound events instead of closing.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("pairing unavailable: {0}")]
    PairingPrecondition(String),

    #[error("handshake failed: {0}")]
    HandshakeIntegrity(String),

    #[error("peer lost: {0}")]
    PeerLost(String),

    #[error("record store error: {0}")]
    Store(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("{0}")]
    Other(String),
}
