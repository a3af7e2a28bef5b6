//! AES-256-GCM frame sealing/opening for relay data links.
//!
//! Wire format after the `hello` exchange: `nonce(12) || ciphertext || tag`.
//! A fresh random nonce is generated for every frame; reuse is never
//! attempted, which would be catastrophic for GCM.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too short to contain a nonce")]
    Truncated,
    #[error("decryption failed: frame was tampered with or the wrong key was used")]
    DecryptFailed,
}

/// A derived AES-256-GCM key shared between two relay peers.
#[derive(Clone)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encrypt `plaintext` into a self-contained frame: `nonce || ct || tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes256Gcm::new_from_slice(&self.0).expect("key is exactly 32 bytes");
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .expect("AES-256-GCM encryption does not fail for in-memory buffers");

        let mut frame = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        frame.extend_from_slice(&nonce_bytes);
        frame.extend_from_slice(&ciphertext);
        frame
    }

    /// Decrypt a frame produced by [`SessionKey::seal`].
    pub fn open(&self, frame: &[u8]) -> Result<Vec<u8>, FrameError> {
        if frame.len() < NONCE_LEN {
            return Err(FrameError::Truncated);
        }
        let (nonce_bytes, ciphertext) = frame.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(&self.0).expect("key is exactly 32 bytes");
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| FrameError::DecryptFailed)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SessionKey {
        SessionKey::new([seed; 32])
    }

    #[test]
    fn seal_then_open_round_trips() {
        let k = key(1);
        let frame = k.seal(b"hello relay");
        let plain = k.open(&frame).unwrap();
        assert_eq!(plain, b"hello relay");
    }

    #[test]
    fn two_seals_of_same_plaintext_differ() {
        let k = key(2);
        let a = k.seal(b"same message");
        let b = k.seal(b"same message");
        assert_ne!(a, b, "nonce must be fresh per frame");
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let k1 = key(3);
        let k2 = key(4);
        let frame = k1.seal(b"secret");
        assert!(matches!(k2.open(&frame), Err(FrameError::DecryptFailed)));
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let k = key(5);
        let mut frame = k.seal(b"do not modify me");
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert!(matches!(k.open(&frame), Err(FrameError::DecryptFailed)));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let k = key(6);
        assert!(matches!(k.open(&[0u8; 4]), Err(FrameError::Truncated)));
    }
}
