//! Device records held by the registry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use termbridge_common::ConnectionId;

use crate::protocol::{Outbound, ServerEvent};

/// Which side of a terminal session a device sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Offers a terminal session.
    Host,
    /// Requests remote access to a host.
    Client,
}

/// Where one device stands in the pairing handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Unpaired,
    /// Reserved and sent `handshake:initiate`.
    ChallengeIssued,
    /// Sent its own signature, still waiting for the peer's.
    Responded,
    /// Holds the peer's signature and has not confirmed it yet.
    PeerVerifying,
    /// Confirmed the peer; waiting for the peer to confirm back.
    Verified,
    Paired,
}

/// The challenge issued to a device for one handshake attempt.
#[derive(Debug, Clone)]
pub(crate) struct PendingChallenge {
    pub(crate) challenge: String,
    pub(crate) attempt: u64,
    pub(crate) responded: bool,
    pub(crate) peer_signature_received: bool,
}

/// Frames a connection may have queued before it counts as too slow.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Sending half of one connection's outbound queue.
///
/// Sends never block. A send to a connection that has already gone away is
/// dropped, which is how mid-handshake disconnects surface to the relay. A
/// send to a full queue drops the frame and flags the connection so its
/// handler closes it.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    overflow: Arc<Notify>,
}

impl Connection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            tx,
            overflow: Arc::new(Notify::new()),
        }
    }

    pub fn send(&self, event: ServerEvent) {
        self.push(Outbound::Event(event));
    }

    pub fn push(&self, outbound: Outbound) {
        match self.tx.try_send(outbound) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(conn = %self.id.short(), "Outbound queue full, dropping slow connection");
                self.overflow.notify_one();
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(conn = %self.id.short(), "Dropped frame for closed connection");
            }
        }
    }

    /// Resolves once a send has found this connection's queue full.
    pub async fn overflowed(&self) {
        self.overflow.notified().await;
    }
}

/// One registered device.
///
/// `paired_with`, `verified` and the pending challenge are only reachable
/// through methods so that changing the peer always resets verification.
#[derive(Debug, Clone)]
pub struct Device {
    pub connection: Connection,
    pub device_id: String,
    pub device_type: DeviceType,
    pub owner: Option<String>,
    pub display_name: String,
    pub public_key: String,
    pub tab_count: u32,
    /// Sequence number of the registration that created this record.
    pub(crate) registration: u64,
    pending: Option<PendingChallenge>,
    verified: bool,
    paired_with: Option<String>,
}

impl Device {
    pub fn new(
        connection: Connection,
        device_id: String,
        device_type: DeviceType,
        public_key: String,
        display_name: String,
    ) -> Self {
        Self {
            connection,
            device_id,
            device_type,
            owner: None,
            display_name,
            public_key,
            tab_count: 0,
            registration: 0,
            pending: None,
            verified: false,
            paired_with: None,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection.id
    }

    pub fn paired_with(&self) -> Option<&str> {
        self.paired_with.as_deref()
    }

    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn pending_challenge(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.challenge.as_str())
    }

    pub fn is_host(&self) -> bool {
        self.device_type == DeviceType::Host
    }

    /// Handshake finished on both sides and the pairing is live.
    pub fn is_paired(&self) -> bool {
        self.paired_with.is_some() && self.verified && self.pending.is_none()
    }

    pub fn phase(&self) -> HandshakePhase {
        match (&self.paired_with, &self.pending) {
            (None, _) => HandshakePhase::Unpaired,
            (Some(_), None) if self.verified => HandshakePhase::Paired,
            (Some(_), None) => HandshakePhase::Unpaired,
            (Some(_), Some(_)) if self.verified => HandshakePhase::Verified,
            (Some(_), Some(p)) if p.peer_signature_received => HandshakePhase::PeerVerifying,
            (Some(_), Some(p)) if p.responded => HandshakePhase::Responded,
            (Some(_), Some(_)) => HandshakePhase::ChallengeIssued,
        }
    }

    pub fn send(&self, event: ServerEvent) {
        self.connection.send(event);
    }

    /// Point this device at a new peer (or none), dropping any handshake progress.
    pub(crate) fn set_paired_with(&mut self, peer: Option<String>) {
        self.paired_with = peer;
        self.verified = false;
        self.pending = None;
    }

    /// Reserve `peer` and issue `challenge` for handshake `attempt`.
    pub(crate) fn reserve(&mut self, peer: String, challenge: String, attempt: u64) {
        self.set_paired_with(Some(peer));
        self.pending = Some(PendingChallenge {
            challenge,
            attempt,
            responded: false,
            peer_signature_received: false,
        });
    }

    pub(crate) fn pending(&self) -> Option<&PendingChallenge> {
        self.pending.as_ref()
    }

    pub(crate) fn pending_mut(&mut self) -> Option<&mut PendingChallenge> {
        self.pending.as_mut()
    }

    pub(crate) fn handshake_attempt(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.attempt)
    }

    pub(crate) fn mark_verified(&mut self) {
        self.verified = true;
    }

    /// Both sides verified: the challenge has served its purpose.
    pub(crate) fn finish_handshake(&mut self) {
        self.pending = None;
    }
}
