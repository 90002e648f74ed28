//! Cryptographic primitives for device pairing.
//!
//! Devices hold P-256 key pairs, derive a shared secret with ECDH, and prove
//! possession of it by HMAC-signing relay-issued challenges. The relay itself
//! only needs [`generate_challenge`] and [`fingerprint`].

pub mod challenge;
pub mod keys;

pub use challenge::{generate_challenge, sign_challenge, verify_challenge, CHALLENGE_LEN};
pub use keys::{
    derive_shared_secret, fingerprint, generate_key_pair, parse_public_key, KeyPair, SharedSecret,
};
