//! The relay core: turns parsed client events into registry operations.
//!
//! Transport-agnostic. [`crate::connection`] feeds it text frames and
//! drains each connection's outbound queue; tests drive it directly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use termbridge_common::{ConnectionId, RelayError};
use termbridge_config::RelayConfig;

use crate::auth::SessionValidator;
use crate::device::{Connection, Device, OUTBOUND_QUEUE_CAPACITY};
use crate::handshake::HandshakeTicket;
use crate::protocol::{ClientEvent, Outbound, ServerEvent};
use crate::registry::Registry;
use crate::router::RouteOutcome;

/// Runtime knobs taken from the config file.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub login_url: String,
    pub handshake_timeout: Duration,
}

impl RelaySettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            login_url: config.auth.login_url.clone(),
            handshake_timeout: Duration::from_secs(u64::from(config.handshake.timeout_secs)),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

#[derive(Clone)]
pub struct Relay {
    registry: Registry,
    validator: Arc<dyn SessionValidator>,
    settings: RelaySettings,
}

impl Relay {
    pub fn new(validator: Arc<dyn SessionValidator>, settings: RelaySettings) -> Self {
        Self {
            registry: Registry::new(),
            validator,
            settings,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Allocate a handle and outbound queue for a new connection.
    pub fn open_connection(&self) -> (Connection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        (Connection::new(ConnectionId::new(), tx), rx)
    }

    /// Parse and handle one inbound text frame.
    pub async fn handle_text(&self, conn: &Connection, text: &str) {
        match ClientEvent::parse(text) {
            Ok(event) => self.dispatch(conn, event).await,
            Err(e) => self.report_error(conn, "frame", e),
        }
    }

    pub async fn dispatch(&self, conn: &Connection, event: ClientEvent) {
        let name = event.name();
        debug!(conn = %conn.id.short(), event = name, "Inbound event");

        let result = match event {
            ClientEvent::Register(payload) => {
                self.registry
                    .register(conn, payload, self.validator.as_ref(), &self.settings.login_url)
                    .await
            }
            ClientEvent::RequestConnection(payload) => {
                self.request_connection(conn, &payload.target_device_id)
                    .await
            }
            ClientEvent::HandshakeResponse(payload) => {
                self.registry
                    .lock()
                    .await
                    .handshake_response(&conn.id, &payload.peer_id, payload.signature)
            }
            ClientEvent::HandshakeConfirmed => self
                .registry
                .lock()
                .await
                .confirm_handshake(&conn.id)
                .map(|_| ()),
            ClientEvent::HandshakeFailed(payload) => {
                let reason = payload
                    .reason
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| "peer signature did not verify".into());
                self.registry.lock().await.fail_handshake(&conn.id, &reason)
            }
            ClientEvent::UpdateTabCount(payload) => self
                .registry
                .lock()
                .await
                .update_tab_count(&conn.id, payload.tab_count),
            ClientEvent::Routed { kind, payload } => {
                let outcome = self.registry.lock().await.route(&conn.id, kind, payload);
                match outcome {
                    RouteOutcome::Forwarded | RouteOutcome::NotPaired => Ok(()),
                    RouteOutcome::Unregistered => Err(RelayError::ProtocolViolation(
                        "device is not registered".into(),
                    )),
                    RouteOutcome::PeerLost => {
                        Err(RelayError::PeerLost("paired device is gone".into()))
                    }
                }
            }
        };

        if let Err(e) = result {
            self.report_error(conn, name, e);
        }
    }

    async fn request_connection(&self, conn: &Connection, target: &str) -> Result<(), RelayError> {
        let mut state = self.registry.lock().await;
        let requested = state.request_pairing(&conn.id, target);
        match requested {
            Ok(ticket) => {
                drop(state);
                self.arm_handshake_timeout(ticket);
                Ok(())
            }
            Err(e @ RelayError::PairingPrecondition(_)) => {
                warn!(conn = %conn.id.short(), target = %target, error = %e, "Pairing refused");
                conn.send(ServerEvent::error(e.to_string()));
                let device_id = state
                    .lookup_by_connection(&conn.id)
                    .map(|d| d.device_id.clone());
                if let Some(device_id) = device_id {
                    state.send_available_to(&device_id);
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn arm_handshake_timeout(&self, ticket: HandshakeTicket) {
        let registry = self.registry.clone();
        let timeout = self.settings.handshake_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            registry.lock().await.expire_handshake(&ticket);
        });
    }

    /// Tear down whatever `handle` had registered.
    pub async fn disconnect(&self, handle: &ConnectionId) -> Option<Device> {
        self.registry.unregister(handle).await
    }

    /// Map a handler error onto the frame the client sees.
    pub fn report_error(&self, conn: &Connection, event: &str, error: RelayError) {
        debug!(conn = %conn.id.short(), event, error = %error, "Event rejected");
        let frame = match error {
            RelayError::AuthenticationFailure(message) => ServerEvent::AuthError { message },
            other => ServerEvent::error(other.to_string()),
        };
        conn.send(frame);
    }
}
