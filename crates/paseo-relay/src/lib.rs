// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Relay client (§4.4): the daemon-side half of reaching a UI client through
//! a relay when it isn't reachable directly. A relay is an external
//! rendezvous collaborator — this crate never runs one in production
//! (DESIGN.md, Open Question 4). It owns the control connection (announcing
//! this daemon under a stable `serverId`) and, per peer, a data link that
//! performs the cleartext `hello` key exchange and then seals every
//! subsequent frame with AES-256-GCM so the relay only ever sees opaque
//! bytes.

mod control;
mod error;
mod link;

#[cfg(test)]
mod testdouble;

pub use control::{ControlConnection, ControlEvent};
pub use error::RelayError;
pub use link::{DataLink, DataLinkReader, DataLinkWriter};

#[cfg(test)]
pub use testdouble::TestRelay;

#[cfg(test)]
mod tests {
    use super::*;
    use link::TestClientLink;
    use paseo_crypto::handshake::ClientHandshake;
    use paseo_crypto::DaemonKeypair;

    fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[tokio::test]
    async fn handshake_and_opacity() {
        let relay = TestRelay::start().await;
        let daemon_keys = DaemonKeypair::generate();
        let daemon_pub = daemon_keys.public_key();
        let url = relay.data_url("conn-2");

        let server_url = url.clone();
        let server_task = tokio::spawn(async move {
            let mut link = DataLink::open_as_server(&server_url, &daemon_keys)
                .await
                .expect("daemon side of the link");
            let from_client = link.recv().await.expect("message from client").unwrap();
            link.send(b"daemon secret reply").await.unwrap();
            from_client
        });

        let handshake = ClientHandshake::generate();
        let mut client = TestClientLink::open(&url, handshake, daemon_pub)
            .await
            .expect("client side of the link");
        client.send(b"client secret message").await.unwrap();
        let from_daemon = client.recv().await.expect("message from daemon").unwrap();

        let from_client = server_task.await.expect("server task join");
        assert_eq!(from_client, b"client secret message");
        assert_eq!(from_daemon, b"daemon secret reply");

        let frames = relay.captured_frames().await;
        assert_eq!(frames.len(), 2, "relay shuttled exactly the two sealed frames");
        for frame in &frames {
            assert!(!contains_subslice(frame, b"client secret message"));
            assert!(!contains_subslice(frame, b"daemon secret reply"));
        }
    }

    #[tokio::test]
    async fn wrong_keypair_cannot_decrypt() {
        let relay = TestRelay::start().await;
        let daemon_keys = DaemonKeypair::generate();
        let attacker_keys = DaemonKeypair::generate();
        let url = relay.data_url("conn-3");

        let server_url = url.clone();
        let server_task = tokio::spawn(async move {
            let mut link = DataLink::open_as_server(&server_url, &daemon_keys)
                .await
                .expect("daemon side of the link");
            link.recv().await
        });

        // The client derives its session key against the attacker's public
        // key, not the real daemon's — as if it had been handed a forged
        // pairing URI. The daemon still derives against its own real secret,
        // so the two sides never agree on a key.
        let handshake = ClientHandshake::generate();
        let mut client = TestClientLink::open(&url, handshake, attacker_keys.public_key())
            .await
            .expect("client completes its half of the handshake regardless");
        client.send(b"never readable").await.unwrap();

        let result = server_task.await.expect("server task join");
        assert!(
            result.expect("link stayed open").is_err(),
            "daemon must fail to decrypt a frame sealed under the wrong key"
        );
    }
}
