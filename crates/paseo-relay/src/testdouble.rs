//! An in-process relay stand-in, built only for tests (testable property 5
//! and scenario 6, `SPEC_FULL.md` §8). A real relay is an external
//! rendezvous collaborator this repository never ships (DESIGN.md, Open
//! Question 4) — this type exists purely so the handshake/framing code in
//! [`crate::link`] can be exercised end to end without one.
//!
//! It does exactly what a relay is allowed to do and nothing more: match two
//! connections that name the same `connectionId` and shuttle their frames
//! back and forth, unread except to record raw bytes for the opacity
//! assertions in tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type InboundWs = WebSocketStream<TcpStream>;
type Waiting = Arc<Mutex<HashMap<String, oneshot::Sender<InboundWs>>>>;

pub struct TestRelay {
    addr: SocketAddr,
    captured: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl TestRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test relay listener");
        let addr = listener.local_addr().expect("test relay local addr");
        let waiting: Waiting = Arc::new(Mutex::new(HashMap::new()));
        let captured = Arc::new(Mutex::new(Vec::new()));

        let waiting_for_task = waiting.clone();
        let captured_for_task = captured.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let waiting = waiting_for_task.clone();
                let captured = captured_for_task.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, waiting, captured).await {
                        tracing::debug!(error = %e, "test relay connection ended");
                    }
                });
            }
        });

        Self { addr, captured }
    }

    pub fn data_url(&self, connection_id: &str) -> String {
        format!("ws://{}/data/{connection_id}", self.addr)
    }

    /// Every binary frame the relay shuttled, in arrival order, from both
    /// directions combined. Used to assert opacity: no plaintext should ever
    /// appear in here.
    pub async fn captured_frames(&self) -> Vec<Vec<u8>> {
        self.captured.lock().await.clone()
    }
}

async fn handle_connection(
    stream: TcpStream,
    waiting: Waiting,
    captured: Arc<Mutex<Vec<Vec<u8>>>>,
) -> anyhow::Result<()> {
    let mut connection_id = None;
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        connection_id = Some(
            req.uri()
                .path()
                .trim_start_matches("/data/")
                .to_string(),
        );
        Ok(resp)
    })
    .await?;
    let connection_id =
        connection_id.ok_or_else(|| anyhow::anyhow!("data link request missing connection id"))?;

    let partner = { waiting.lock().await.remove(&connection_id) };
    match partner {
        Some(tx) => {
            // Second arrival for this connectionId: hand our socket to the
            // task that's already waiting and let it drive the splice.
            let _ = tx.send(ws);
            Ok(())
        }
        None => {
            let (tx, rx) = oneshot::channel();
            waiting.lock().await.insert(connection_id, tx);
            let peer = rx
                .await
                .map_err(|_| anyhow::anyhow!("peer never connected to complete the data link"))?;
            splice(ws, peer, captured).await
        }
    }
}

async fn splice(a: InboundWs, b: InboundWs, captured: Arc<Mutex<Vec<Vec<u8>>>>) -> anyhow::Result<()> {
    let (mut a_write, mut a_read) = a.split();
    let (mut b_write, mut b_read) = b.split();
    let captured_ab = captured.clone();
    let captured_ba = captured;

    let a_to_b = async move {
        while let Some(Ok(msg)) = a_read.next().await {
            if let Message::Binary(bytes) = &msg {
                captured_ab.lock().await.push(bytes.clone());
            }
            if b_write.send(msg).await.is_err() {
                break;
            }
        }
    };
    let b_to_a = async move {
        while let Some(Ok(msg)) = b_read.next().await {
            if let Message::Binary(bytes) = &msg {
                captured_ba.lock().await.push(bytes.clone());
            }
            if a_write.send(msg).await.is_err() {
                break;
            }
        }
    };

    tokio::join!(a_to_b, b_to_a);
    Ok(())
}
