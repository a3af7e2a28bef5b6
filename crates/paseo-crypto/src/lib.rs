// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Cryptographic primitives for the relay path (§4.4) and for bearer-token
//! secret handling (pairing / CLI auth).
//!
//! # Handshake
//!
//! Each relay data link performs: client sends cleartext `hello` carrying
//! its X25519 public key; both sides derive a shared AES-256-GCM key via
//! `HKDF-SHA256(X25519(priv, peer_pub))`; every subsequent frame is
//! `nonce(12) || ciphertext || tag` with a fresh random nonce.
//!
//! # Secrets
//!
//! Bearer tokens are generated, shown to the operator once, then only their
//! SHA-256 digest is persisted — mirroring the rest of this codebase's
//! secret-handling discipline.

pub mod fingerprint;
pub mod frame;
pub mod handshake;
pub mod peers;
pub mod token;

pub use fingerprint::{Fingerprint, PairingUri};
pub use frame::{FrameError, SessionKey};
pub use handshake::{DaemonKeypair, PeerPublicKey};
pub use peers::PeerAllowlist;
pub use token::{RawToken, StoredToken, StoredTokenFile};
