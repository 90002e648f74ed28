//! termbridge-relay: WebSocket relay that pairs terminal hosts with remote
//! clients of the same identity.
//!
//! Devices register, authenticate with a bearer credential, and pair through
//! an ECDH-backed challenge/response the relay mediates but cannot forge.
//! Once paired, application events flow between the two devices verbatim.

pub mod auth;
pub mod availability;
pub mod connection;
pub mod device;
pub mod handshake;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod router;
pub mod server;

#[cfg(test)]
mod testing;

pub use auth::{IdentityStore, MemoryIdentityStore, SessionValidator, TokenValidator};
pub use device::{Connection, Device, DeviceType, HandshakePhase};
pub use registry::Registry;
pub use relay::{Relay, RelaySettings};
