//! In-process harness for relay tests: real credentials, real key pairs,
//! connections backed by plain channels instead of sockets.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use termbridge_crypto::{
    derive_shared_secret, generate_key_pair, sign_challenge, verify_challenge, KeyPair,
};

use crate::auth::{MemoryIdentityStore, TokenValidator};
use crate::device::{Connection, DeviceType};
use crate::protocol::{Outbound, ServerEvent};
use crate::relay::{Relay, RelaySettings};

pub(crate) const TEST_SECRET: &str = "harness-secret-0123456789";

/// Every queued relay event, skipping forwards and close requests.
pub(crate) fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<ServerEvent> {
    drain_outbound(rx)
        .into_iter()
        .filter_map(|o| match o {
            Outbound::Event(e) => Some(e),
            _ => None,
        })
        .collect()
}

pub(crate) fn drain_outbound(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(o) = rx.try_recv() {
        out.push(o);
    }
    out
}

pub(crate) struct TestDevice {
    pub keys: KeyPair,
    pub conn: Connection,
    pub rx: mpsc::Receiver<Outbound>,
}

impl TestDevice {
    pub fn events(&mut self) -> Vec<ServerEvent> {
        drain(&mut self.rx)
    }

    /// Sign `challenge` with the secret shared with `peer_public_key`.
    pub fn sign(&self, peer_public_key: &str, challenge: &str) -> String {
        let secret = derive_shared_secret(&self.keys.private_key, peer_public_key).unwrap();
        sign_challenge(challenge, &secret).unwrap()
    }

    pub fn verify(&self, peer_public_key: &str, challenge: &str, signature: &str) -> bool {
        let secret = derive_shared_secret(&self.keys.private_key, peer_public_key).unwrap();
        verify_challenge(challenge, signature, &secret).unwrap()
    }
}

/// The `handshake:initiate` a device received: (peer id, peer key, challenge).
pub(crate) fn initiate_of(events: &[ServerEvent]) -> (String, String, String) {
    events
        .iter()
        .find_map(|e| match e {
            ServerEvent::HandshakeInitiate {
                peer_id,
                peer_public_key,
                challenge,
            } => Some((peer_id.clone(), peer_public_key.clone(), challenge.clone())),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no handshake:initiate in {events:?}"))
}

/// The `handshake:verify` a device received: (peer id, signature, challenge).
pub(crate) fn verify_of(events: &[ServerEvent]) -> (String, String, String) {
    events
        .iter()
        .find_map(|e| match e {
            ServerEvent::HandshakeVerify {
                peer_id,
                signature,
                challenge,
            } => Some((peer_id.clone(), signature.clone(), challenge.clone())),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no handshake:verify in {events:?}"))
}

pub(crate) struct RelayHarness {
    pub relay: Relay,
    pub validator: Arc<TokenValidator<MemoryIdentityStore>>,
    pub store: MemoryIdentityStore,
}

impl RelayHarness {
    pub fn new() -> Self {
        Self::with_handshake_timeout(Duration::from_secs(30))
    }

    pub fn with_handshake_timeout(timeout: Duration) -> Self {
        let store = MemoryIdentityStore::default();
        let validator = Arc::new(TokenValidator::new(TEST_SECRET, store.clone()));
        let settings = RelaySettings {
            login_url: "https://login.test/auth".into(),
            handshake_timeout: timeout,
        };
        Self {
            relay: Relay::new(validator.clone(), settings),
            validator,
            store,
        }
    }

    /// A valid credential for `identity`, creating the identity record.
    pub async fn credential(&self, identity: &str) -> String {
        self.store.insert(identity).await;
        self.validator
            .issue(identity, chrono::Duration::hours(1))
            .unwrap()
    }

    pub async fn send(&self, device: &TestDevice, text: &str) {
        self.relay.handle_text(&device.conn, text).await;
    }

    /// Open a connection and register on it with the given fields.
    pub async fn register_raw(&self, data: serde_json::Value) -> TestDevice {
        let (conn, rx) = self.relay.open_connection();
        let device = TestDevice {
            keys: generate_key_pair(),
            conn,
            rx,
        };
        let frame = json!({ "event": "register", "data": data });
        self.send(&device, &frame.to_string()).await;
        device
    }

    pub async fn register(
        &self,
        id: &str,
        device_type: DeviceType,
        identity: &str,
        name: Option<&str>,
        tab_count: u32,
    ) -> TestDevice {
        let credential = self.credential(identity).await;
        let (conn, rx) = self.relay.open_connection();
        let device = TestDevice {
            keys: generate_key_pair(),
            conn,
            rx,
        };
        let frame = json!({
            "event": "register",
            "data": {
                "type": device_type,
                "deviceId": id,
                "deviceName": name,
                "publicKey": device.keys.public_key,
                "credential": credential,
                "tabCount": tab_count,
            }
        });
        self.send(&device, &frame.to_string()).await;
        device
    }

    pub async fn register_host(&self, id: &str, identity: &str) -> TestDevice {
        self.register(id, DeviceType::Host, identity, None, 0).await
    }

    pub async fn register_host_named(
        &self,
        id: &str,
        identity: &str,
        name: &str,
        tab_count: u32,
    ) -> TestDevice {
        self.register(id, DeviceType::Host, identity, Some(name), tab_count)
            .await
    }

    pub async fn register_client(&self, id: &str, identity: &str) -> TestDevice {
        self.register(id, DeviceType::Client, identity, None, 0).await
    }

    pub async fn request(&self, client: &TestDevice, target: &str) {
        let frame = json!({
            "event": "request_connection",
            "data": { "targetDeviceId": target },
        });
        self.send(client, &frame.to_string()).await;
    }

    /// Answer a `handshake:initiate` with a correct signature.
    pub async fn respond(&self, device: &TestDevice, initiate: &(String, String, String)) {
        let (peer_id, peer_key, challenge) = initiate;
        let frame = json!({
            "event": "handshake:response",
            "data": { "peerId": peer_id, "signature": device.sign(peer_key, challenge) },
        });
        self.send(device, &frame.to_string()).await;
    }

    pub async fn confirm(&self, device: &TestDevice) {
        self.send(device, r#"{"event":"handshake:confirmed","data":{}}"#)
            .await;
    }

    /// Register `host_id` and `client_id` under `identity` and run the whole
    /// handshake, checking every signature along the way.
    pub async fn pair(
        &self,
        host_id: &str,
        client_id: &str,
        identity: &str,
    ) -> (TestDevice, TestDevice) {
        let mut host = self.register_host(host_id, identity).await;
        let mut client = self.register_client(client_id, identity).await;
        host.events();
        client.events();

        self.request(&client, host_id).await;
        let host_init = initiate_of(&host.events());
        let client_init = initiate_of(&client.events());

        self.respond(&host, &host_init).await;
        self.respond(&client, &client_init).await;

        let (_, sig, challenge) = verify_of(&client.events());
        assert!(client.verify(&client_init.1, &challenge, &sig));
        let (_, sig, challenge) = verify_of(&host.events());
        assert!(host.verify(&host_init.1, &challenge, &sig));

        self.confirm(&client).await;
        self.confirm(&host).await;

        assert!(host
            .events()
            .iter()
            .any(|e| matches!(e, ServerEvent::Paired { .. })));
        assert!(client
            .events()
            .iter()
            .any(|e| matches!(e, ServerEvent::Paired { .. })));
        (host, client)
    }
}
