//! Relay wire protocol.
//!
//! Every frame is a JSON text frame `{"event": <name>, "data": <payload>}`.
//! Relay-level events are parsed into [`ClientEvent`]; the routed kinds keep
//! their payload as raw JSON so it can be forwarded byte-for-byte.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use termbridge_common::RelayError;

use crate::device::DeviceType;

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    event: String,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

/// `register` payload. Required fields are optional here so a missing one
/// surfaces as a protocol violation instead of a parse error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub credential: Option<String>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub public_key: Option<String>,
    pub tab_count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConnectionPayload {
    pub target_device_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponsePayload {
    pub peer_id: String,
    pub signature: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeFailedPayload {
    pub peer_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabCountPayload {
    pub tab_count: u32,
}

/// Event kinds the relay forwards blindly between paired devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutedKind {
    WebrtcOffer,
    WebrtcAnswer,
    WebrtcIceCandidate,
    TerminalInput,
    TerminalOutput,
    TerminalResize,
    TerminalDimensions,
    SystemMessage,
}

impl RoutedKind {
    pub const ALL: [RoutedKind; 8] = [
        RoutedKind::WebrtcOffer,
        RoutedKind::WebrtcAnswer,
        RoutedKind::WebrtcIceCandidate,
        RoutedKind::TerminalInput,
        RoutedKind::TerminalOutput,
        RoutedKind::TerminalResize,
        RoutedKind::TerminalDimensions,
        RoutedKind::SystemMessage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RoutedKind::WebrtcOffer => "webrtc:offer",
            RoutedKind::WebrtcAnswer => "webrtc:answer",
            RoutedKind::WebrtcIceCandidate => "webrtc:ice-candidate",
            RoutedKind::TerminalInput => "terminal:input",
            RoutedKind::TerminalOutput => "terminal:output",
            RoutedKind::TerminalResize => "terminal:resize",
            RoutedKind::TerminalDimensions => "terminal:dimensions",
            RoutedKind::SystemMessage => "system:message",
        }
    }

    pub fn from_event(event: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == event)
    }
}

/// A parsed inbound frame.
#[derive(Debug)]
pub enum ClientEvent {
    Register(RegisterPayload),
    RequestConnection(RequestConnectionPayload),
    HandshakeResponse(HandshakeResponsePayload),
    HandshakeConfirmed,
    HandshakeFailed(HandshakeFailedPayload),
    UpdateTabCount(TabCountPayload),
    Routed {
        kind: RoutedKind,
        payload: Option<Box<RawValue>>,
    },
}

impl ClientEvent {
    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let envelope: RawEnvelope = serde_json::from_str(text)
            .map_err(|e| RelayError::ProtocolViolation(format!("malformed frame: {e}")))?;
        let event = envelope.event.as_str();

        if let Some(kind) = RoutedKind::from_event(event) {
            return Ok(ClientEvent::Routed {
                kind,
                payload: envelope.data,
            });
        }

        let data = envelope.data.as_deref();
        match event {
            "register" => Ok(ClientEvent::Register(payload(event, data)?)),
            "request_connection" => Ok(ClientEvent::RequestConnection(payload(event, data)?)),
            "handshake:response" => Ok(ClientEvent::HandshakeResponse(payload(event, data)?)),
            "handshake:confirmed" => Ok(ClientEvent::HandshakeConfirmed),
            "handshake:failed" => Ok(ClientEvent::HandshakeFailed(
                data.map(|raw| payload(event, Some(raw)))
                    .transpose()?
                    .unwrap_or_default(),
            )),
            "update_tab_count" => Ok(ClientEvent::UpdateTabCount(payload(event, data)?)),
            other => Err(RelayError::ProtocolViolation(format!(
                "unknown event: {other}"
            ))),
        }
    }

    /// Event name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Register(_) => "register",
            ClientEvent::RequestConnection(_) => "request_connection",
            ClientEvent::HandshakeResponse(_) => "handshake:response",
            ClientEvent::HandshakeConfirmed => "handshake:confirmed",
            ClientEvent::HandshakeFailed(_) => "handshake:failed",
            ClientEvent::UpdateTabCount(_) => "update_tab_count",
            ClientEvent::Routed { kind, .. } => kind.as_str(),
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    event: &str,
    data: Option<&RawValue>,
) -> Result<T, RelayError> {
    let raw = data.ok_or_else(|| {
        RelayError::ProtocolViolation(format!("{event}: missing data"))
    })?;
    serde_json::from_str(raw.get())
        .map_err(|e| RelayError::ProtocolViolation(format!("{event}: {e}")))
}

/// One entry of the `available_devices` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableDevice {
    pub device_id: String,
    pub device_name: String,
    pub status: String,
    pub tab_count: u32,
}

/// Messages the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "authenticated")]
    Authenticated { credential: String, identity: String },

    #[serde(rename = "login_required")]
    LoginRequired { message: String, login_url: String },

    #[serde(rename = "auth_error")]
    AuthError { message: String },

    #[serde(rename = "available_devices")]
    AvailableDevices(Vec<AvailableDevice>),

    #[serde(rename = "handshake:initiate")]
    HandshakeInitiate {
        peer_id: String,
        peer_public_key: String,
        challenge: String,
    },

    #[serde(rename = "handshake:verify")]
    HandshakeVerify {
        peer_id: String,
        signature: String,
        challenge: String,
    },

    #[serde(rename = "handshake:failed")]
    HandshakeFailed { message: String, peer_id: String },

    #[serde(rename = "paired")]
    Paired { message: String, peer_id: String },

    #[serde(rename = "paired_device_disconnected")]
    PairedDeviceDisconnected { message: String },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "request_dimensions")]
    RequestDimensions {},
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Authenticated { .. } => "authenticated",
            ServerEvent::LoginRequired { .. } => "login_required",
            ServerEvent::AuthError { .. } => "auth_error",
            ServerEvent::AvailableDevices(_) => "available_devices",
            ServerEvent::HandshakeInitiate { .. } => "handshake:initiate",
            ServerEvent::HandshakeVerify { .. } => "handshake:verify",
            ServerEvent::HandshakeFailed { .. } => "handshake:failed",
            ServerEvent::Paired { .. } => "paired",
            ServerEvent::PairedDeviceDisconnected { .. } => "paired_device_disconnected",
            ServerEvent::Error { .. } => "error",
            ServerEvent::RequestDimensions {} => "request_dimensions",
        }
    }
}

/// Anything queued for delivery on one connection.
#[derive(Debug)]
pub enum Outbound {
    Event(ServerEvent),
    /// A routed event from the paired peer, payload untouched.
    Forward {
        kind: RoutedKind,
        payload: Option<Box<RawValue>>,
    },
    /// Close the socket after flushing what came before.
    Close(String),
}

#[derive(Serialize)]
struct ForwardFrame<'a> {
    event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a RawValue>,
}

/// Serialize a relay event as a text frame.
pub fn encode_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

/// Serialize a forwarded event; the payload is embedded as received.
pub fn encode_forward(
    kind: RoutedKind,
    payload: Option<&RawValue>,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ForwardFrame {
        event: kind.as_str(),
        data: payload,
    })
}

/// Parse the `type` field of a registration.
pub fn parse_device_type(value: Option<&str>) -> Result<DeviceType, RelayError> {
    match value.map(str::trim) {
        Some("host") => Ok(DeviceType::Host),
        Some("client") => Ok(DeviceType::Client),
        Some(other) => Err(RelayError::ProtocolViolation(format!(
            "type must be \"host\" or \"client\", got {other:?}"
        ))),
        None => Err(RelayError::ProtocolViolation("type is required".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_register() {
        let ev = ClientEvent::parse(
            r#"{"event":"register","data":{"type":"host","deviceId":"h1","publicKey":"04ab","credential":"tok","deviceName":"Laptop","tabCount":3}}"#,
        )
        .unwrap();
        match ev {
            ClientEvent::Register(p) => {
                assert_eq!(p.device_type.as_deref(), Some("host"));
                assert_eq!(p.device_id.as_deref(), Some("h1"));
                assert_eq!(p.public_key.as_deref(), Some("04ab"));
                assert_eq!(p.credential.as_deref(), Some("tok"));
                assert_eq!(p.device_name.as_deref(), Some("Laptop"));
                assert_eq!(p.tab_count, Some(3));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn register_without_fields_still_parses() {
        let ev = ClientEvent::parse(r#"{"event":"register","data":{"type":"client"}}"#).unwrap();
        assert!(matches!(ev, ClientEvent::Register(p) if p.device_id.is_none()));
    }

    #[test]
    fn handshake_confirmed_accepts_empty_or_missing_data() {
        assert!(matches!(
            ClientEvent::parse(r#"{"event":"handshake:confirmed","data":{}}"#).unwrap(),
            ClientEvent::HandshakeConfirmed
        ));
        assert!(matches!(
            ClientEvent::parse(r#"{"event":"handshake:confirmed"}"#).unwrap(),
            ClientEvent::HandshakeConfirmed
        ));
    }

    #[test]
    fn handshake_failed_payload_is_optional() {
        let ev = ClientEvent::parse(r#"{"event":"handshake:failed"}"#).unwrap();
        assert!(matches!(ev, ClientEvent::HandshakeFailed(p) if p.reason.is_none()));

        let ev = ClientEvent::parse(
            r#"{"event":"handshake:failed","data":{"peerId":"h1","reason":"bad signature"}}"#,
        )
        .unwrap();
        assert!(
            matches!(ev, ClientEvent::HandshakeFailed(p) if p.reason.as_deref() == Some("bad signature"))
        );
    }

    #[test]
    fn routed_payload_is_kept_raw() {
        let text = r#"{"event":"terminal:output","data":{"data":"x",  "seq": 1.50}}"#;
        match ClientEvent::parse(text).unwrap() {
            ClientEvent::Routed { kind, payload } => {
                assert_eq!(kind, RoutedKind::TerminalOutput);
                assert_eq!(payload.unwrap().get(), r#"{"data":"x",  "seq": 1.50}"#);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn every_routed_kind_round_trips_its_name() {
        for kind in RoutedKind::ALL {
            assert_eq!(RoutedKind::from_event(kind.as_str()), Some(kind));
        }
        assert_eq!(RoutedKind::from_event("register"), None);
    }

    #[test]
    fn unknown_event_is_protocol_violation() {
        let err = ClientEvent::parse(r#"{"event":"launch_missiles","data":{}}"#).unwrap_err();
        assert!(matches!(err, RelayError::ProtocolViolation(_)));
    }

    #[test]
    fn malformed_frame_is_protocol_violation() {
        let err = ClientEvent::parse("not json").unwrap_err();
        assert!(matches!(err, RelayError::ProtocolViolation(_)));

        let err = ClientEvent::parse(r#"{"event":"request_connection","data":{}}"#).unwrap_err();
        assert!(err.to_string().contains("request_connection"));
    }

    #[test]
    fn server_event_wire_shape() {
        let json = encode_event(&ServerEvent::HandshakeInitiate {
            peer_id: "h1".into(),
            peer_public_key: "04ab".into(),
            challenge: "cc".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"event":"handshake:initiate","data":{"peerId":"h1","peerPublicKey":"04ab","challenge":"cc"}}"#
        );

        let json = encode_event(&ServerEvent::RequestDimensions {}).unwrap();
        assert_eq!(json, r#"{"event":"request_dimensions","data":{}}"#);

        let json = encode_event(&ServerEvent::LoginRequired {
            message: "m".into(),
            login_url: "u".into(),
        })
        .unwrap();
        assert!(json.contains(r#""loginUrl":"u""#));
    }

    #[test]
    fn available_devices_wire_shape() {
        let json = encode_event(&ServerEvent::AvailableDevices(vec![AvailableDevice {
            device_id: "h1".into(),
            device_name: "Laptop".into(),
            status: "available".into(),
            tab_count: 2,
        }]))
        .unwrap();
        assert_eq!(
            json,
            r#"{"event":"available_devices","data":[{"deviceId":"h1","deviceName":"Laptop","status":"available","tabCount":2}]}"#
        );
    }

    #[test]
    fn forward_frame_embeds_payload_verbatim() {
        let raw = RawValue::from_string(r#"{"data":"x",  "n": 1.50}"#.to_string()).unwrap();
        let json = encode_forward(RoutedKind::TerminalOutput, Some(&raw)).unwrap();
        assert_eq!(
            json,
            r#"{"event":"terminal:output","data":{"data":"x",  "n": 1.50}}"#
        );

        let json = encode_forward(RoutedKind::SystemMessage, None).unwrap();
        assert_eq!(json, r#"{"event":"system:message"}"#);
    }

    #[test]
    fn device_type_parsing() {
        assert_eq!(parse_device_type(Some("host")).unwrap(), DeviceType::Host);
        assert_eq!(parse_device_type(Some("client")).unwrap(), DeviceType::Client);
        assert!(parse_device_type(Some("toaster")).is_err());
        assert!(parse_device_type(None).is_err());
    }
}
