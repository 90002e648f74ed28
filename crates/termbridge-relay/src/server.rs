//! TCP accept loop and WebSocket upgrade.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use termbridge_common::BridgeError;
use termbridge_config::ServerConfig;

use crate::connection::handle_connection;
use crate::relay::Relay;

pub async fn bind(config: &ServerConfig) -> Result<TcpListener, BridgeError> {
    let addr = config.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| BridgeError::Network(format!("failed to bind {addr}: {e}")))?;
    tracing::info!("termbridge-relay listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept connections forever, one task each.
pub async fn serve(listener: TcpListener, relay: Relay, upgrade_timeout: Duration) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let relay = relay.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout(upgrade_timeout, accept_async(stream)).await {
                        Ok(Ok(ws)) => handle_connection(ws, addr, relay).await,
                        Ok(Err(e)) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                        Err(_) => {
                            tracing::warn!(
                                peer = %addr,
                                timeout_secs = upgrade_timeout.as_secs(),
                                "WS handshake timed out"
                            );
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}
