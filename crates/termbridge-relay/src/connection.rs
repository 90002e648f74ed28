//! Per-connection handler: feed inbound frames to the relay, write queued
//! frames back out, tear the device down on exit.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;

use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{encode_event, encode_forward, Outbound, ServerEvent};
use crate::relay::Relay;

type WsStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// Handle a single WebSocket connection until either side closes it.
pub async fn handle_connection(ws: WsStream, addr: SocketAddr, relay: Relay) {
    let (mut sink, mut stream) = ws.split();
    let (conn, mut rx) = relay.open_connection();

    tracing::info!(peer = %addr, conn = %conn.id.short(), "Client connected");

    loop {
        tokio::select! {
            // Queued frames for this client, in the order they were produced.
            Some(outbound) = rx.recv() => {
                let text = match outbound {
                    Outbound::Event(event) => encode_event(&event),
                    Outbound::Forward { kind, payload } => encode_forward(kind, payload.as_deref()),
                    Outbound::Close(reason) => {
                        tracing::info!(conn = %conn.id.short(), reason = %reason, "Closing connection");
                        let _ = sink.send(close_frame(CloseCode::Policy, reason)).await;
                        break;
                    }
                };
                match text {
                    Ok(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(conn = %conn.id.short(), error = %e, "Failed to encode frame");
                    }
                }
            }

            // Too slow to keep up with its peer.
            _ = conn.overflowed() => {
                tracing::warn!(peer = %addr, conn = %conn.id.short(), "Closing lagging connection");
                let _ = sink.send(close_frame(CloseCode::Again, "outbound queue full".into())).await;
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let handled = AssertUnwindSafe(relay.handle_text(&conn, text.as_str()))
                            .catch_unwind()
                            .await;
                        if handled.is_err() {
                            tracing::error!(conn = %conn.id.short(), "Event handler panicked");
                            conn.send(ServerEvent::error("internal error while handling event"));
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        conn.send(ServerEvent::error("binary frames are not supported"));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    let removed = relay.disconnect(&conn.id).await;
    tracing::info!(
        peer = %addr,
        conn = %conn.id.short(),
        device_id = removed.as_ref().map(|d| d.device_id.as_str()).unwrap_or("-"),
        "Client disconnected"
    );
}

fn close_frame(code: CloseCode, reason: String) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}
