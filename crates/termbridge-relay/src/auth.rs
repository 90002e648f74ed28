//! Session validation: bearer credential → identity.
//!
//! Credentials are minted by the external login service as
//! `<identity>.<expires_at_unix>.<hex hmac>` where the MAC is HMAC-SHA256
//! over `<identity>.<expires_at_unix>` keyed by the shared token secret.
//! A valid MAC is not enough: the identity record must still exist.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::RwLock;

use termbridge_common::RelayError;

type HmacSha256 = Hmac<Sha256>;

/// Resolves a credential to the identity it is bound to.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// `AuthenticationFailure` for anything that is not a live session.
    async fn validate(&self, credential: &str) -> Result<String, RelayError>;
}

/// Record store lookup for identities.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn identity_exists(&self, identity: &str) -> Result<bool, RelayError>;
}

/// In-memory identity records, seeded from config.
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityStore {
    identities: Arc<RwLock<HashSet<String>>>,
}

impl MemoryIdentityStore {
    pub fn new<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identities: Arc::new(RwLock::new(
                identities.into_iter().map(Into::into).collect(),
            )),
        }
    }

    pub async fn insert(&self, identity: impl Into<String>) {
        self.identities.write().await.insert(identity.into());
    }

    pub async fn remove(&self, identity: &str) -> bool {
        self.identities.write().await.remove(identity)
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn identity_exists(&self, identity: &str) -> Result<bool, RelayError> {
        Ok(self.identities.read().await.contains(identity))
    }
}

/// Validates HMAC-signed, expiring bearer tokens against an [`IdentityStore`].
pub struct TokenValidator<S> {
    secret: Vec<u8>,
    store: S,
}

impl<S: IdentityStore> TokenValidator<S> {
    pub fn new(secret: impl AsRef<[u8]>, store: S) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            store,
        }
    }

    /// Mint a credential for `identity` valid for `ttl`.
    ///
    /// The relay never calls this itself; it exists for the login service
    /// and for tests.
    pub fn issue(&self, identity: &str, ttl: chrono::Duration) -> Result<String, RelayError> {
        let expires_at = (chrono::Utc::now() + ttl).timestamp();
        let body = format!("{identity}.{expires_at}");
        let mac = self.mac(&body)?;
        Ok(format!("{body}.{}", hex::encode(mac.finalize().into_bytes())))
    }

    /// Check MAC and expiry, returning the bound identity.
    pub fn verify_token(&self, credential: &str, now_unix: i64) -> Result<String, RelayError> {
        let invalid = || RelayError::AuthenticationFailure("invalid credential".into());

        let mut parts = credential.rsplitn(3, '.');
        let (Some(signature), Some(expires_at), Some(identity)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if identity.is_empty() {
            return Err(invalid());
        }

        let signature = hex::decode(signature).map_err(|_| invalid())?;
        let mac = self.mac(&format!("{identity}.{expires_at}"))?;
        mac.verify_slice(&signature).map_err(|_| invalid())?;

        let expires_at: i64 = expires_at.parse().map_err(|_| invalid())?;
        if expires_at <= now_unix {
            return Err(RelayError::AuthenticationFailure(
                "credential expired".into(),
            ));
        }
        Ok(identity.to_string())
    }

    fn mac(&self, body: &str) -> Result<HmacSha256, RelayError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| RelayError::AuthenticationFailure(e.to_string()))?;
        mac.update(body.as_bytes());
        Ok(mac)
    }
}

#[async_trait]
impl<S: IdentityStore> SessionValidator for TokenValidator<S> {
    async fn validate(&self, credential: &str) -> Result<String, RelayError> {
        let identity = self.verify_token(credential, chrono::Utc::now().timestamp())?;
        if !self.store.identity_exists(&identity).await? {
            return Err(RelayError::AuthenticationFailure(
                "identity no longer exists".into(),
            ));
        }
        Ok(identity)
    }
}
