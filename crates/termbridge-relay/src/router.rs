//! Message router: forwards application events between paired devices.

use serde_json::value::RawValue;
use tracing::{debug, info};

use termbridge_common::ConnectionId;

use crate::protocol::{Outbound, RoutedKind};
use crate::registry::RegistryState;

/// What happened to one routed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Forwarded,
    /// The sending connection has no device record.
    Unregistered,
    /// The sender has no completed pairing.
    NotPaired,
    /// The recorded peer is gone or no longer points back. The sender's
    /// stale pairing has been cleared.
    PeerLost,
}

impl RegistryState {
    /// Forward `payload` to the sender's paired peer, untouched.
    pub(crate) fn route(
        &mut self,
        source: &ConnectionId,
        kind: RoutedKind,
        payload: Option<Box<RawValue>>,
    ) -> RouteOutcome {
        let Some(sender) = self.lookup_by_connection(source) else {
            return RouteOutcome::Unregistered;
        };
        if !sender.is_paired() {
            debug!(
                device_id = %sender.device_id,
                event = kind.as_str(),
                "Dropped event from unpaired device"
            );
            return RouteOutcome::NotPaired;
        }
        let sender_id = sender.device_id.clone();
        let peer_id = sender.paired_with().unwrap_or_default().to_string();

        let peer = self
            .lookup_by_id(&peer_id)
            .filter(|p| p.paired_with() == Some(sender_id.as_str()) && p.is_paired());
        match peer {
            Some(peer) => {
                peer.connection.push(Outbound::Forward { kind, payload });
                RouteOutcome::Forwarded
            }
            None => {
                info!(
                    device_id = %sender_id,
                    peer_id = %peer_id,
                    "Paired peer is gone; clearing stale pairing"
                );
                let sender = self.lookup_by_id_mut(&sender_id);
                let notify = sender.and_then(|s| {
                    s.set_paired_with(None);
                    (!s.is_host()).then(|| s.device_id.clone())
                });
                if let Some(client_id) = notify {
                    self.send_available_to(&client_id);
                }
                RouteOutcome::PeerLost
            }
        }
    }
}
