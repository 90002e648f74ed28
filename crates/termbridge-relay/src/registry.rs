//! Device registry: every registered device, indexed by connection and by id.
//!
//! Both indices live in one [`RegistryState`] behind a single mutex. Each
//! compound change (registration, teardown, pairing steps) runs inside one
//! critical section, and the frames it produces are queued before the lock
//! is released, so peers observe pairing changes in the order they happened.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use termbridge_common::{ConnectionId, RelayError};

use crate::auth::SessionValidator;
use crate::device::{Connection, Device, DeviceType};
use crate::protocol::{parse_device_type, AvailableDevice, Outbound, RegisterPayload, ServerEvent};

/// The two indices plus the handshake attempt counter.
#[derive(Debug, Default)]
pub struct RegistryState {
    by_connection: HashMap<ConnectionId, String>,
    by_id: HashMap<String, Device>,
    next_attempt: u64,
    next_registration: u64,
}

impl RegistryState {
    pub fn lookup_by_connection(&self, handle: &ConnectionId) -> Option<&Device> {
        let device_id = self.by_connection.get(handle)?;
        self.by_id
            .get(device_id)
            .filter(|d| d.connection_id() == handle)
    }

    pub fn lookup_by_id(&self, device_id: &str) -> Option<&Device> {
        self.by_id.get(device_id)
    }

    pub(crate) fn lookup_by_connection_mut(&mut self, handle: &ConnectionId) -> Option<&mut Device> {
        let device_id = self.by_connection.get(handle)?;
        self.by_id
            .get_mut(device_id)
            .filter(|d| d.connection_id() == handle)
    }

    pub(crate) fn lookup_by_id_mut(&mut self, device_id: &str) -> Option<&mut Device> {
        self.by_id.get_mut(device_id)
    }

    pub(crate) fn devices(&self) -> impl Iterator<Item = &Device> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub(crate) fn next_attempt(&mut self) -> u64 {
        self.next_attempt += 1;
        self.next_attempt
    }

    pub(crate) fn next_registration(&mut self) -> u64 {
        self.next_registration += 1;
        self.next_registration
    }

    /// True if the record for `device_id` came from a registration that
    /// started after `sequence`.
    pub(crate) fn registered_after(&self, device_id: &str, sequence: u64) -> bool {
        self.by_id
            .get(device_id)
            .is_some_and(|d| d.registration > sequence)
    }

    /// Owner of the record for `device_id` when it is authenticated and
    /// bound to a connection other than `handle`.
    pub(crate) fn owned_elsewhere(&self, handle: &ConnectionId, device_id: &str) -> Option<String> {
        self.by_id
            .get(device_id)
            .filter(|d| d.connection_id() != handle)
            .and_then(|d| d.owner.clone())
    }

    /// Store a freshly registered device.
    ///
    /// A connection that was already registered loses its previous record
    /// first. A device id bound to another live connection is taken over:
    /// the older connection is torn down, told why, and closed.
    pub(crate) fn insert(&mut self, device: Device) {
        let handle = device.connection_id().clone();

        if self.by_connection.contains_key(&handle) {
            self.remove_connection(&handle);
        }

        let previous = self
            .by_id
            .get(&device.device_id)
            .map(|d| d.connection_id().clone());
        if let Some(old_handle) = previous {
            if let Some(old) = self.remove_connection(&old_handle) {
                info!(
                    device_id = %old.device_id,
                    old_conn = %old_handle.short(),
                    new_conn = %handle.short(),
                    "Device re-registered from a new connection"
                );
                old.send(ServerEvent::error(
                    "this device registered again from another connection",
                ));
                old.connection
                    .push(Outbound::Close("superseded by a newer connection".into()));
            }
        }

        self.by_connection
            .insert(handle, device.device_id.clone());
        self.by_id.insert(device.device_id.clone(), device);
    }

    /// Remove the record owned by `handle`, tearing down its pairing.
    ///
    /// Idempotent. The id index entry is only deleted if it still points at
    /// `handle`, so a late teardown of a replaced connection is harmless.
    pub(crate) fn remove_connection(&mut self, handle: &ConnectionId) -> Option<Device> {
        let device_id = self.by_connection.remove(handle)?;
        let still_ours = self
            .by_id
            .get(&device_id)
            .is_some_and(|d| d.connection_id() == handle);
        if !still_ours {
            debug!(device_id = %device_id, conn = %handle.short(), "Stale teardown ignored");
            return None;
        }

        let device = self.by_id.remove(&device_id)?;
        let peer_was_host = self.release_peer(&device);

        if device.is_host() || peer_was_host {
            if let Some(owner) = device.owner.as_deref() {
                self.notify_available(owner);
            }
        }
        Some(device)
    }

    /// Clear the departed device's peer and tell it why. Returns whether
    /// that peer is a host (and so available again).
    fn release_peer(&mut self, departed: &Device) -> bool {
        let Some(peer_id) = departed.paired_with() else {
            return false;
        };
        let Some(peer) = self.by_id.get_mut(peer_id) else {
            return false;
        };
        if peer.paired_with() != Some(departed.device_id.as_str()) {
            return false;
        }

        peer.set_paired_with(None);
        if departed.is_paired() {
            peer.send(ServerEvent::PairedDeviceDisconnected {
                message: format!("{} disconnected", departed.display_name),
            });
        } else {
            peer.send(ServerEvent::HandshakeFailed {
                message: RelayError::PeerLost(departed.device_id.clone()).to_string(),
                peer_id: departed.device_id.clone(),
            });
        }
        info!(
            device_id = %departed.device_id,
            peer_id = %peer_id,
            "Pairing torn down"
        );
        peer.is_host()
    }

    pub(crate) fn update_tab_count(
        &mut self,
        handle: &ConnectionId,
        tab_count: u32,
    ) -> Result<(), RelayError> {
        let device = self
            .lookup_by_connection_mut(handle)
            .ok_or_else(|| RelayError::ProtocolViolation("device is not registered".into()))?;
        if !device.is_host() {
            return Err(RelayError::ProtocolViolation(
                "only host devices report a tab count".into(),
            ));
        }
        device.tab_count = tab_count;
        let owner = device.owner.clone();
        if let Some(owner) = owner {
            self.notify_available(&owner);
        }
        Ok(())
    }
}

/// Shared handle to the registry.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    state: Arc<Mutex<RegistryState>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the registry's critical section.
    pub async fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().await
    }

    pub async fn lookup_by_connection(&self, handle: &ConnectionId) -> Option<Device> {
        self.lock().await.lookup_by_connection(handle).cloned()
    }

    pub async fn lookup_by_id(&self, device_id: &str) -> Option<Device> {
        self.lock().await.lookup_by_id(device_id).cloned()
    }

    pub async fn compute_available(&self, identity: &str) -> Vec<AvailableDevice> {
        self.lock().await.compute_available(identity)
    }

    pub async fn len(&self) -> usize {
        self.lock().await.len()
    }

    /// Register the device behind `conn`.
    ///
    /// The credential is checked before anything is stored, outside the
    /// lock. Each registration takes a sequence number up front; if a later
    /// registration for the same id landed while the validator ran, this
    /// one is discarded. A record that already has an owner is only ever
    /// replaced by a registration authenticated as that owner.
    pub async fn register(
        &self,
        conn: &Connection,
        request: RegisterPayload,
        validator: &dyn SessionValidator,
        login_url: &str,
    ) -> Result<(), RelayError> {
        let device_id = required(request.device_id, "deviceId")?;
        let public_key = required(request.public_key, "publicKey")?;
        let device_type = parse_device_type(request.device_type.as_deref())?;
        let display_name = request
            .device_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| device_id.clone());

        info!(
            conn = %conn.id.short(),
            device_id = %device_id,
            device_type = ?device_type,
            key = %termbridge_crypto::fingerprint(&public_key),
            "Device registering"
        );

        let sequence = self.lock().await.next_registration();
        let mut device = Device::new(
            conn.clone(),
            device_id.clone(),
            device_type,
            public_key,
            display_name,
        );
        device.tab_count = request.tab_count.unwrap_or(0);
        device.registration = sequence;

        let Some(credential) = request.credential.filter(|c| !c.is_empty()) else {
            let mut state = self.lock().await;
            if let Some(holder) = state.owned_elsewhere(&conn.id, &device_id) {
                warn!(
                    conn = %conn.id.short(),
                    device_id = %device_id,
                    owner = %holder,
                    "Unauthenticated registration left the owned record in place"
                );
            } else {
                state.insert(device);
            }
            conn.send(ServerEvent::LoginRequired {
                message: "Sign in to pair this device".into(),
                login_url: scoped_login_url(login_url, &device_id),
            });
            return Ok(());
        };

        let validated = validator.validate(&credential).await;

        let mut state = self.lock().await;
        if state.registered_after(&device_id, sequence) {
            debug!(
                conn = %conn.id.short(),
                device_id = %device_id,
                "Registration superseded while validating credential"
            );
            return Ok(());
        }

        let identity = match validated {
            Ok(identity) => identity,
            Err(RelayError::Store(e)) => {
                warn!(device_id = %device_id, error = %e, "Identity lookup failed");
                return Err(RelayError::AuthenticationFailure(
                    "could not verify credential".into(),
                ));
            }
            Err(e) => return Err(e),
        };

        if let Some(holder) = state.owned_elsewhere(&conn.id, &device_id) {
            if holder != identity {
                warn!(
                    device_id = %device_id,
                    identity = %identity,
                    owner = %holder,
                    "Device id claimed by another identity"
                );
                return Err(RelayError::AuthenticationFailure(
                    "device is registered to another account".into(),
                ));
            }
        }

        device.owner = Some(identity.clone());
        state.insert(device);
        conn.send(ServerEvent::Authenticated {
            credential,
            identity: identity.clone(),
        });
        info!(device_id = %device_id, identity = %identity, "Device authenticated");

        if device_type == DeviceType::Host {
            state.notify_available(&identity);
        } else {
            state.send_available_to(&device_id);
        }
        Ok(())
    }

    /// Tear down the device behind `handle`, if any.
    pub async fn unregister(&self, handle: &ConnectionId) -> Option<Device> {
        let removed = self.lock().await.remove_connection(handle);
        if let Some(device) = &removed {
            info!(
                conn = %handle.short(),
                device_id = %device.device_id,
                "Device unregistered"
            );
        }
        removed
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, RelayError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RelayError::ProtocolViolation(format!("{field} is required")))
}

/// Login URL carrying the device id so the login page can hand the
/// credential back to the right device.
pub fn scoped_login_url(base: &str, device_id: &str) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}deviceId={}", urlencoding::encode(device_id))
}
