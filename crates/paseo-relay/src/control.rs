//! The daemon's control connection to a relay (§4.4): a single long-lived
//! WebSocket the daemon opens as a client, announcing itself with a stable
//! `serverId`. The relay answers with a `connected{connectionId}` event for
//! every peer that shows up wanting to talk to this `serverId`; each one is
//! handled by opening a separate [`crate::link::DataLink`].

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::RelayError;

type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Serialize)]
struct ControlHello {
    #[serde(rename = "type")]
    kind: &'static str,
    role: &'static str,
    #[serde(rename = "serverId")]
    server_id: String,
    v: u8,
}

/// Events the relay pushes down the control connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlEvent {
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: String,
    },
    Disconnected {
        #[serde(rename = "connectionId")]
        connection_id: String,
    },
}

/// A daemon's open control connection to a relay.
pub struct ControlConnection {
    ws: ClientWs,
}

impl ControlConnection {
    /// Connect to `url` and announce this daemon as `server_id`.
    pub async fn connect(url: &str, server_id: impl Into<String>) -> Result<Self, RelayError> {
        let (mut ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("connecting to relay control endpoint {url}"))?;

        let hello = ControlHello {
            kind: "hello",
            role: "server",
            server_id: server_id.into(),
            v: 2,
        };
        let payload = serde_json::to_string(&hello).context("encoding control hello")?;
        ws.send(Message::Text(payload))
            .await
            .context("sending control hello")?;

        Ok(Self { ws })
    }

    /// Wait for the next event the relay sends on this control connection.
    /// Returns `None` once the relay closes the connection.
    pub async fn next_event(&mut self) -> Option<Result<ControlEvent, RelayError>> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(
                        serde_json::from_str(&text)
                            .context("parsing control event")
                            .map_err(RelayError::from),
                    );
                }
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(RelayError::from(anyhow::Error::from(e)))),
            }
        }
    }
}
