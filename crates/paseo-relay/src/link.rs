//! A single relay data link (§4.4): cleartext `hello` key exchange, then
//! AES-256-GCM-sealed frames for everything after. The relay that carries
//! these bytes never sees anything but the `hello` and opaque ciphertext.

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use paseo_crypto::{DaemonKeypair, PeerPublicKey, SessionKey};

use crate::error::RelayError;

type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Serialize, Deserialize)]
struct HelloFrame {
    #[serde(rename = "type")]
    kind: String,
    key: String,
}

/// One established, encrypted data link to a peer via the relay.
pub struct DataLink {
    ws: ClientWs,
    key: SessionKey,
    peer_pub: PeerPublicKey,
}

impl DataLink {
    /// Open the daemon's side of a data link: connect to `url`, wait for the
    /// peer's cleartext `hello` carrying its ephemeral X25519 public key, and
    /// derive the session key against the daemon's stable keypair.
    pub async fn open_as_server(url: &str, daemon_keys: &DaemonKeypair) -> Result<Self, RelayError> {
        let (mut ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("connecting to relay data link {url}"))?;

        let hello = read_hello(&mut ws).await?;
        let peer_pub = PeerPublicKey::from_base64(&hello.key)
            .map_err(|e| RelayError::Handshake(e.to_string()))?;
        let key = daemon_keys.derive_session_key(peer_pub);

        Ok(Self { ws, key, peer_pub })
    }

    /// The peer's ephemeral public key presented in its `hello` frame, so a
    /// caller can check it against a fingerprint allowlist before trusting
    /// the link (§4.4 pairing).
    pub fn peer_public_key(&self) -> PeerPublicKey {
        self.peer_pub
    }

    /// Seal and send one application message.
    pub async fn send(&mut self, plaintext: &[u8]) -> Result<(), RelayError> {
        let frame = self.key.seal(plaintext);
        self.ws
            .send(Message::Binary(frame))
            .await
            .context("sending relay data frame")?;
        Ok(())
    }

    /// Receive and open the next application message. Returns `None` once
    /// the link closes.
    pub async fn recv(&mut self) -> Option<Result<Vec<u8>, RelayError>> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return Some(
                        self.key
                            .open(&data)
                            .map_err(|e| RelayError::Decrypt(e.to_string())),
                    );
                }
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(RelayError::from(anyhow::Error::from(e)))),
            }
        }
    }

    /// Split into independent reader/writer halves so a caller can drive
    /// recv and send concurrently (e.g. from the two arms of one
    /// `tokio::select!` loop) without the two operations fighting over a
    /// single `&mut DataLink` borrow.
    pub fn split(self) -> (DataLinkReader, DataLinkWriter) {
        let (sink, stream) = self.ws.split();
        (
            DataLinkReader { stream, key: self.key.clone() },
            DataLinkWriter { sink, key: self.key },
        )
    }
}

type ClientWsSink = futures::stream::SplitSink<ClientWs, Message>;
type ClientWsStream = futures::stream::SplitStream<ClientWs>;

pub struct DataLinkReader {
    stream: ClientWsStream,
    key: SessionKey,
}

impl DataLinkReader {
    /// Receive and open the next application message. Returns `None` once
    /// the link closes.
    pub async fn recv(&mut self) -> Option<Result<Vec<u8>, RelayError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return Some(
                        self.key
                            .open(&data)
                            .map_err(|e| RelayError::Decrypt(e.to_string())),
                    );
                }
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(RelayError::from(anyhow::Error::from(e)))),
            }
        }
    }
}

pub struct DataLinkWriter {
    sink: ClientWsSink,
    key: SessionKey,
}

impl DataLinkWriter {
    /// Seal and send one application message.
    pub async fn send(&mut self, plaintext: &[u8]) -> Result<(), RelayError> {
        let frame = self.key.seal(plaintext);
        self.sink
            .send(Message::Binary(frame))
            .await
            .context("sending relay data frame")?;
        Ok(())
    }
}

async fn read_hello(ws: &mut ClientWs) -> anyhow::Result<HelloFrame> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).context("parsing hello frame");
            }
            Some(Ok(Message::Close(_))) | None => {
                anyhow::bail!("relay data link closed before hello arrived")
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod client_side {
    //! The client side of the handshake (sending `hello`, deriving the
    //! session key against the daemon's published public key) has no
    //! production caller in this repository — real remote clients are
    //! external collaborators (browser/mobile apps). It is implemented here
    //! only so tests can drive both ends of a link against the in-process
    //! relay test-double.
    use super::*;
    use paseo_crypto::handshake::ClientHandshake;

    pub struct TestClientLink {
        ws: ClientWs,
        key: SessionKey,
    }

    impl TestClientLink {
        pub async fn open(
            url: &str,
            mut handshake: ClientHandshake,
            daemon_pub: PeerPublicKey,
        ) -> anyhow::Result<Self> {
            let (mut ws, _response) = tokio_tungstenite::connect_async(url)
                .await
                .with_context(|| format!("connecting to relay data link {url}"))?;

            let hello = HelloFrame {
                kind: "hello".to_string(),
                key: handshake.public_key().to_base64(),
            };
            ws.send(Message::Text(serde_json::to_string(&hello)?))
                .await
                .context("sending hello frame")?;

            let key = handshake.derive_session_key(daemon_pub)?;
            Ok(Self { ws, key })
        }

        pub async fn send(&mut self, plaintext: &[u8]) -> anyhow::Result<()> {
            let frame = self.key.seal(plaintext);
            self.ws
                .send(Message::Binary(frame))
                .await
                .context("sending relay data frame")
        }

        pub async fn recv(&mut self) -> Option<anyhow::Result<Vec<u8>>> {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        return Some(self.key.open(&data).context("opening relay data frame"));
                    }
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Some(Err(e.into())),
                }
            }
        }
    }
}

#[cfg(test)]
pub use client_side::TestClientLink;
