//! P-256 key pairs and ECDH shared-secret derivation.
//!
//! Keys travel as hex: public keys as SEC1 uncompressed points (65 bytes),
//! private keys as the raw 32-byte scalar. The relay only ever sees public
//! keys; private keys and shared secrets stay on the devices.

use std::fmt;

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};

use termbridge_common::CryptoError;

/// A freshly generated key pair, hex-encoded.
#[derive(Clone)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Raw ECDH output (the x-coordinate of the shared point).
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for SharedSecret {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// Generate a new P-256 key pair.
pub fn generate_key_pair() -> KeyPair {
    let secret = SecretKey::random(&mut rand::thread_rng());
    let public_key = hex::encode(secret.public_key().to_encoded_point(false).as_bytes());
    let private_key = hex::encode(secret.to_bytes());
    KeyPair {
        public_key,
        private_key,
    }
}

/// Derive the ECDH shared secret between our private key and a peer's public key.
///
/// Symmetric: `derive(a_priv, b_pub) == derive(b_priv, a_pub)`.
pub fn derive_shared_secret(
    private_key_hex: &str,
    peer_public_key_hex: &str,
) -> Result<SharedSecret, CryptoError> {
    let secret = parse_private_key(private_key_hex)?;
    let peer = parse_public_key(peer_public_key_hex)?;
    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());

    let mut out = [0u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes().as_slice());
    Ok(SharedSecret(out))
}

/// Decode and curve-check a hex SEC1 public key.
pub fn parse_public_key(public_key_hex: &str) -> Result<PublicKey, CryptoError> {
    let bytes = decode_hex(public_key_hex)?;
    PublicKey::from_sec1_bytes(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

fn parse_private_key(private_key_hex: &str) -> Result<SecretKey, CryptoError> {
    let bytes = decode_hex(private_key_hex)?;
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidKeyLength(format!(
            "private key must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    SecretKey::from_slice(&bytes).map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))
}

/// First 8 bytes of SHA-256 over the hex key text, colon-separated.
///
/// Used to identify a key in logs without printing the whole thing.
pub fn fingerprint(public_key_hex: &str) -> String {
    let hash = Sha256::digest(public_key_hex.as_bytes());
    let parts: Vec<String> = hash[..8].iter().map(|b| format!("{b:02x}")).collect();
    parts.join(":")
}

pub(crate) fn decode_hex(value: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(value.trim()).map_err(|e| CryptoError::InvalidHex(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_pair_encoding_lengths() {
        let kp = generate_key_pair();
        // 0x04 || X || Y
        assert_eq!(kp.public_key.len(), 130);
        assert!(kp.public_key.starts_with("04"));
        assert_eq!(kp.private_key.len(), 64);
    }

    #[test]
    fn key_pairs_are_unique() {
        let a = generate_key_pair();
        let b = generate_key_pair();
        assert_ne!(a.public_key, b.public_key);
        assert_ne!(a.private_key, b.private_key);
    }

    #[test]
    fn shared_secret_is_symmetric() {
        for _ in 0..8 {
            let a = generate_key_pair();
            let b = generate_key_pair();
            let ab = derive_shared_secret(&a.private_key, &b.public_key).unwrap();
            let ba = derive_shared_secret(&b.private_key, &a.public_key).unwrap();
            assert_eq!(ab, ba);
        }
    }

    #[test]
    fn shared_secret_differs_per_peer() {
        let a = generate_key_pair();
        let b = generate_key_pair();
        let c = generate_key_pair();
        let ab = derive_shared_secret(&a.private_key, &b.public_key).unwrap();
        let ac = derive_shared_secret(&a.private_key, &c.public_key).unwrap();
        assert_ne!(ab, ac);
    }

    #[test]
    fn malformed_hex_is_an_error() {
        let a = generate_key_pair();
        let err = derive_shared_secret(&a.private_key, "zz-not-hex").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidHex(_)));
    }

    #[test]
    fn off_curve_point_is_rejected() {
        let a = generate_key_pair();
        // Valid SEC1 framing, but (1, 1) is not on P-256.
        let mut bogus = vec![0x04];
        bogus.extend_from_slice(&[0u8; 31]);
        bogus.push(1);
        bogus.extend_from_slice(&[0u8; 31]);
        bogus.push(1);
        let err = derive_shared_secret(&a.private_key, &hex::encode(bogus)).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidPublicKey(_)));
    }

    #[test]
    fn short_private_key_is_rejected() {
        let b = generate_key_pair();
        let err = derive_shared_secret("abcd", &b.public_key).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength(_)));
    }

    #[test]
    fn fingerprint_format() {
        let kp = generate_key_pair();
        let fp = fingerprint(&kp.public_key);
        let parts: Vec<&str> = fp.split(':').collect();
        assert_eq!(parts.len(), 8);
        for part in &parts {
            assert_eq!(part.len(), 2);
            assert!(part.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn debug_output_hides_secrets() {
        let kp = generate_key_pair();
        let debug = format!("{kp:?}");
        assert!(!debug.contains(&kp.private_key));

        let secret = SharedSecret::from([7u8; 32]);
        assert_eq!(format!("{secret:?}"), "SharedSecret(<redacted>)");
    }
}
