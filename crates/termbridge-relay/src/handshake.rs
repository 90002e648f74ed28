//! Pairing handshake, mediated by the relay.
//!
//! ```text
//! client                     relay                       host
//!   | request_connection ----> |                           |
//!   | <--- handshake:initiate  |  handshake:initiate --->  |
//!   | handshake:response ----> |  handshake:verify ----->  |
//!   | <----- handshake:verify  | <---- handshake:response  |
//!   | handshake:confirmed ---> | <--- handshake:confirmed  |
//!   | <----------- paired      |  paired, request_dims ->  |
//! ```
//!
//! Each side is sent its own challenge and the peer's public key. It signs
//! that challenge with the ECDH secret; the relay hands the signature, plus
//! the challenge it was made over, to the peer, which recomputes it from its
//! side of the ECDH. The relay only ever sees public keys, challenges and
//! MACs. A device counts as verified only after it says so itself.

use tracing::{debug, info, warn};

use termbridge_common::{ConnectionId, RelayError};
use termbridge_crypto::generate_challenge;

use crate::device::DeviceType;
use crate::protocol::ServerEvent;
use crate::registry::RegistryState;

/// A reservation made by a successful pairing request. The caller arms the
/// handshake timeout with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeTicket {
    pub attempt: u64,
    pub client_id: String,
    pub host_id: String,
}

fn not_registered() -> RelayError {
    RelayError::ProtocolViolation("device is not registered".into())
}

fn no_handshake() -> RelayError {
    RelayError::ProtocolViolation("no handshake in progress".into())
}

impl RegistryState {
    /// Validate a client's pairing request and, if allowed, reserve both
    /// devices and send each its `handshake:initiate`.
    pub(crate) fn request_pairing(
        &mut self,
        requester: &ConnectionId,
        target_id: &str,
    ) -> Result<HandshakeTicket, RelayError> {
        let client = self
            .lookup_by_connection(requester)
            .ok_or_else(not_registered)?;
        let owner = client.owner.clone().ok_or_else(|| {
            RelayError::PairingPrecondition("sign in before requesting a connection".into())
        })?;
        if client.device_type != DeviceType::Client {
            return Err(RelayError::PairingPrecondition(
                "only client devices can request a connection".into(),
            ));
        }
        if client.paired_with().is_some() {
            return Err(RelayError::PairingPrecondition(
                "this device is already paired".into(),
            ));
        }
        let client_id = client.device_id.clone();
        let client_key = client.public_key.clone();

        // Hosts of other identities are reported exactly like missing ones.
        let host = self
            .lookup_by_id(target_id)
            .filter(|d| d.owner.as_deref() == Some(owner.as_str()))
            .ok_or_else(|| {
                RelayError::PairingPrecondition(format!("device {target_id} is not available"))
            })?;
        if !host.is_host() {
            return Err(RelayError::PairingPrecondition(format!(
                "device {target_id} is not a host"
            )));
        }
        if host.paired_with().is_some() {
            return Err(RelayError::PairingPrecondition(format!(
                "device {target_id} is already paired"
            )));
        }
        let host_id = host.device_id.clone();
        let host_key = host.public_key.clone();

        let attempt = self.next_attempt();
        let client_challenge = generate_challenge();
        let host_challenge = generate_challenge();

        if let Some(client) = self.lookup_by_id_mut(&client_id) {
            client.reserve(host_id.clone(), client_challenge.clone(), attempt);
            client.send(ServerEvent::HandshakeInitiate {
                peer_id: host_id.clone(),
                peer_public_key: host_key,
                challenge: client_challenge,
            });
        }
        if let Some(host) = self.lookup_by_id_mut(&host_id) {
            host.reserve(client_id.clone(), host_challenge.clone(), attempt);
            host.send(ServerEvent::HandshakeInitiate {
                peer_id: client_id.clone(),
                peer_public_key: client_key,
                challenge: host_challenge,
            });
        }

        info!(
            client_id = %client_id,
            host_id = %host_id,
            attempt,
            "Handshake initiated"
        );
        Ok(HandshakeTicket {
            attempt,
            client_id,
            host_id,
        })
    }

    /// Forward a device's signature to its reserved peer.
    pub(crate) fn handshake_response(
        &mut self,
        source: &ConnectionId,
        peer_id: &str,
        signature: String,
    ) -> Result<(), RelayError> {
        let device = self
            .lookup_by_connection(source)
            .ok_or_else(not_registered)?;
        let pending = device.pending().ok_or_else(no_handshake)?;
        if device.paired_with() != Some(peer_id) {
            return Err(RelayError::ProtocolViolation(format!(
                "handshake peer is not {peer_id}"
            )));
        }
        if pending.responded {
            return Err(RelayError::ProtocolViolation(
                "handshake response already sent".into(),
            ));
        }
        let source_id = device.device_id.clone();
        let challenge = pending.challenge.clone();
        let attempt = pending.attempt;

        if !self.peer_in_attempt(peer_id, &source_id, attempt) {
            self.drop_reservation(&source_id);
            return Err(RelayError::PeerLost(peer_id.to_string()));
        }

        if let Some(pending) = self
            .lookup_by_id_mut(&source_id)
            .and_then(|d| d.pending_mut())
        {
            pending.responded = true;
        }
        if let Some(peer) = self.lookup_by_id_mut(peer_id) {
            if let Some(pending) = peer.pending_mut() {
                pending.peer_signature_received = true;
            }
            peer.send(ServerEvent::HandshakeVerify {
                peer_id: source_id.clone(),
                signature,
                challenge,
            });
        }
        debug!(from = %source_id, to = %peer_id, attempt, "Handshake response forwarded");
        Ok(())
    }

    /// Record that a device verified its peer's signature; finish the
    /// pairing once both sides have. Returns the ticket when the pair
    /// became PAIRED.
    pub(crate) fn confirm_handshake(
        &mut self,
        source: &ConnectionId,
    ) -> Result<Option<HandshakeTicket>, RelayError> {
        let device = self
            .lookup_by_connection(source)
            .ok_or_else(not_registered)?;
        let pending = device.pending().ok_or_else(no_handshake)?;
        if !pending.peer_signature_received {
            return Err(RelayError::ProtocolViolation(
                "peer signature has not been received yet".into(),
            ));
        }
        let attempt = pending.attempt;
        let source_id = device.device_id.clone();
        let peer_id = device.paired_with().unwrap_or_default().to_string();

        if !self.peer_in_attempt(&peer_id, &source_id, attempt) {
            self.drop_reservation(&source_id);
            return Err(RelayError::PeerLost(peer_id));
        }

        if let Some(device) = self.lookup_by_id_mut(&source_id) {
            device.mark_verified();
        }
        debug!(device_id = %source_id, attempt, "Handshake confirmed");

        let peer_verified = self.lookup_by_id(&peer_id).is_some_and(|p| p.verified());
        if !peer_verified {
            return Ok(None);
        }

        let ticket = self.finalize_pairing(&source_id, &peer_id, attempt);
        Ok(Some(ticket))
    }

    /// A device reports that verification failed; revert both sides.
    pub(crate) fn fail_handshake(
        &mut self,
        source: &ConnectionId,
        reason: &str,
    ) -> Result<(), RelayError> {
        let device = self
            .lookup_by_connection(source)
            .ok_or_else(not_registered)?;
        let attempt = device.handshake_attempt().ok_or_else(no_handshake)?;
        let source_id = device.device_id.clone();
        let peer_id = device.paired_with().unwrap_or_default().to_string();

        warn!(
            device_id = %source_id,
            peer_id = %peer_id,
            attempt,
            reason = %reason,
            "Handshake failed"
        );
        let message = RelayError::HandshakeIntegrity(reason.to_string()).to_string();
        self.revert_attempt(&source_id, &peer_id, attempt, &message);
        Ok(())
    }

    /// Timer expiry. No-op unless the ticket's attempt is still unfinished.
    pub(crate) fn expire_handshake(&mut self, ticket: &HandshakeTicket) -> bool {
        let message = RelayError::HandshakeIntegrity("timed out".into()).to_string();
        let reverted = self.revert_attempt(
            &ticket.client_id,
            &ticket.host_id,
            ticket.attempt,
            &message,
        );
        if reverted {
            warn!(
                client_id = %ticket.client_id,
                host_id = %ticket.host_id,
                attempt = ticket.attempt,
                "Handshake timed out"
            );
        }
        reverted
    }

    /// True if `peer_id` is still reserved for `source_id` in `attempt`.
    fn peer_in_attempt(&self, peer_id: &str, source_id: &str, attempt: u64) -> bool {
        self.lookup_by_id(peer_id).is_some_and(|peer| {
            peer.paired_with() == Some(source_id) && peer.handshake_attempt() == Some(attempt)
        })
    }

    /// Unilateral cleanup when the peer is gone or no longer ours.
    fn drop_reservation(&mut self, device_id: &str) {
        let owner = self.lookup_by_id_mut(device_id).and_then(|d| {
            d.set_paired_with(None);
            d.owner.clone()
        });
        if let Some(owner) = owner {
            self.notify_available(&owner);
        }
    }

    /// Put both sides of `attempt` back to unpaired and tell them why.
    /// Sides that already moved on are left alone.
    fn revert_attempt(&mut self, a: &str, b: &str, attempt: u64, message: &str) -> bool {
        let mut owner = None;
        for (id, peer) in [(a, b), (b, a)] {
            let Some(device) = self.lookup_by_id_mut(id) else {
                continue;
            };
            if device.handshake_attempt() != Some(attempt) {
                continue;
            }
            device.set_paired_with(None);
            device.send(ServerEvent::HandshakeFailed {
                message: message.to_string(),
                peer_id: peer.to_string(),
            });
            owner = device.owner.clone();
        }

        match owner {
            Some(owner) => {
                self.notify_available(&owner);
                true
            }
            None => false,
        }
    }

    fn finalize_pairing(&mut self, a: &str, b: &str, attempt: u64) -> HandshakeTicket {
        let name_of = |state: &RegistryState, id: &str| {
            state
                .lookup_by_id(id)
                .map(|d| d.display_name.clone())
                .unwrap_or_else(|| id.to_string())
        };
        let a_name = name_of(self, a);
        let b_name = name_of(self, b);

        let mut ticket = HandshakeTicket {
            attempt,
            client_id: String::new(),
            host_id: String::new(),
        };
        let mut owner = None;

        for (id, peer_id, peer_name) in [(a, b, &b_name), (b, a, &a_name)] {
            let Some(device) = self.lookup_by_id_mut(id) else {
                continue;
            };
            device.finish_handshake();
            device.send(ServerEvent::Paired {
                message: format!("Paired with {peer_name}"),
                peer_id: peer_id.to_string(),
            });
            if device.is_host() {
                // The newly attached peer needs the host's current size.
                device.send(ServerEvent::RequestDimensions {});
                ticket.host_id = id.to_string();
            } else {
                ticket.client_id = id.to_string();
            }
            owner = device.owner.clone();
        }

        if let Some(owner) = owner {
            self.notify_available(&owner);
        }
        info!(
            client_id = %ticket.client_id,
            host_id = %ticket.host_id,
            attempt,
            "Devices paired"
        );
        ticket
    }
}
