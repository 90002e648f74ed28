//! Availability notifier: which hosts an identity's clients may pair with.

use tracing::debug;

use crate::protocol::{AvailableDevice, ServerEvent};
use crate::registry::RegistryState;

/// `status` value of every entry in the availability list.
pub const STATUS_AVAILABLE: &str = "available";

impl RegistryState {
    /// Hosts owned by `identity` that are neither paired nor mid-handshake,
    /// ordered by device id.
    pub fn compute_available(&self, identity: &str) -> Vec<AvailableDevice> {
        let mut available: Vec<AvailableDevice> = self
            .devices()
            .filter(|d| d.is_host())
            .filter(|d| d.owner.as_deref() == Some(identity))
            .filter(|d| d.paired_with().is_none())
            .map(|d| AvailableDevice {
                device_id: d.device_id.clone(),
                device_name: d.display_name.clone(),
                status: STATUS_AVAILABLE.into(),
                tab_count: d.tab_count,
            })
            .collect();
        available.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        available
    }

    /// Push the current list to every client device of `identity`.
    pub(crate) fn notify_available(&self, identity: &str) {
        let available = self.compute_available(identity);
        let mut clients = 0usize;
        for client in self
            .devices()
            .filter(|d| !d.is_host() && d.owner.as_deref() == Some(identity))
        {
            client.send(ServerEvent::AvailableDevices(available.clone()));
            clients += 1;
        }
        debug!(
            identity = %identity,
            hosts = available.len(),
            clients,
            "Availability pushed"
        );
    }

    /// Push the current list to one device, if it is authenticated.
    pub(crate) fn send_available_to(&self, device_id: &str) {
        let Some(device) = self.lookup_by_id(device_id) else {
            return;
        };
        if let Some(owner) = device.owner.as_deref() {
            device.send(ServerEvent::AvailableDevices(self.compute_available(owner)));
        }
    }
}
