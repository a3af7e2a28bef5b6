//! The local WebSocket transport (§4.4): JSON text frames over axum's
//! WebSocket upgrade, split into two cooperating tasks per connection — a
//! reader that owns inbound parsing and dispatch, and a writer that drains
//! the outbound queue — so a slow consumer never blocks the read side.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::connection::{Connection, Hub};
use crate::error::HubError;
use crate::wire;

pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Publicly accessible socket handler, usable directly by a router or a
/// test harness without going through the upgrade extractor.
pub async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    info!("hub connection accepted");
    let (mut sink, mut stream) = socket.split();

    let (conn, mut out_rx) = Connection::new(hub);
    conn.send_initial_state().await;

    let writer_shutdown = conn.shutdown.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_shutdown.cancelled() => break,
                msg = out_rx.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = sink.send(Message::Text(wire::encode(&msg))).await.map_err(HubError::from) {
                            debug!("websocket send failed: {e}");
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    loop {
        tokio::select! {
            _ = conn.shutdown.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => conn.handle_text(&text).await,
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Binary(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("websocket recv error: {e}");
                    break;
                }
            },
        }
    }

    conn.shutdown.cancel();
    if writer.await.is_err() {
        warn!("hub connection writer task panicked");
    }
    info!("hub connection closed");
}
