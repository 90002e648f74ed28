//! Pairing challenges: generation, HMAC signing, constant-time verification.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use termbridge_common::CryptoError;

use crate::keys::{decode_hex, SharedSecret};

type HmacSha256 = Hmac<Sha256>;

/// Challenge length in bytes before hex encoding.
pub const CHALLENGE_LEN: usize = 32;

/// Generate a fresh random challenge, hex-encoded.
pub fn generate_challenge() -> String {
    let mut bytes = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// HMAC-SHA256 over the decoded challenge bytes, keyed by the shared secret.
pub fn sign_challenge(challenge_hex: &str, secret: &SharedSecret) -> Result<String, CryptoError> {
    let challenge = decode_hex(challenge_hex)?;
    let mut mac = new_mac(secret)?;
    mac.update(&challenge);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Recompute the HMAC and compare it against `signature_hex`.
///
/// The comparison is constant-time (`Mac::verify_slice`). A signature of the
/// wrong length simply fails; only undecodable hex is reported as an error.
pub fn verify_challenge(
    challenge_hex: &str,
    signature_hex: &str,
    secret: &SharedSecret,
) -> Result<bool, CryptoError> {
    let challenge = decode_hex(challenge_hex)?;
    let signature = decode_hex(signature_hex)?;
    let mut mac = new_mac(secret)?;
    mac.update(&challenge);
    Ok(mac.verify_slice(&signature).is_ok())
}

fn new_mac(secret: &SharedSecret) -> Result<HmacSha256, CryptoError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CryptoError::InvalidKeyLength(e.to_string()))
}
