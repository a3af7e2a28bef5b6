//! X25519 keypairs and HKDF-SHA256 key derivation for the relay handshake.

use std::path::Path;

use anyhow::Context;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::frame::SessionKey;

/// A peer's X25519 public key, as exchanged in the `hello` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerPublicKey(pub [u8; 32]);

impl PeerPublicKey {
    pub fn from_base64(s: &str) -> anyhow::Result<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| anyhow::anyhow!("invalid base64 public key: {e}"))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("public key must be 32 bytes"))?;
        Ok(Self(arr))
    }

    pub fn to_base64(self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }
}

/// The daemon's long-lived relay identity keypair.
///
/// A fresh [`EphemeralSecret`] is used per data-link handshake rather than
/// reusing this secret directly for the Diffie-Hellman step, but the public
/// half is stable and is what gets embedded in the QR bootstrap / pairing
/// URI (§4.4).
pub struct DaemonKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl DaemonKeypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> PeerPublicKey {
        PeerPublicKey(self.public.to_bytes())
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Derive the shared session key against a client's ephemeral public key.
    pub fn derive_session_key(&self, client_pub: PeerPublicKey) -> SessionKey {
        let shared = self.secret.diffie_hellman(&PublicKey::from(client_pub.0));
        derive_key(shared.as_bytes())
    }

    /// Load this daemon's persisted relay identity from `path`, generating
    /// and saving a fresh one on first run (mode 0600). The public half is
    /// what gets embedded in every `paseo pair` bootstrap URI, so losing
    /// this file means every previously paired peer must re-pair.
    pub fn load_or_generate(path: &Path) -> anyhow::Result<Self> {
        if path.is_file() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading daemon identity {}", path.display()))?;
            let stored: StoredDaemonKey =
                serde_yaml::from_str(&text).context("parsing daemon identity file")?;
            let bytes: [u8; 32] = hex::decode(&stored.secret)
                .context("decoding daemon identity secret")?
                .try_into()
                .map_err(|_| anyhow::anyhow!("daemon identity secret must be 32 bytes"))?;
            return Ok(Self::from_bytes(bytes));
        }

        let keys = Self::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let stored = StoredDaemonKey {
            secret: hex::encode(keys.to_bytes()),
        };
        let yaml = serde_yaml::to_string(&stored).context("serializing daemon identity")?;
        write_secret_file(path, yaml.as_bytes())?;
        Ok(keys)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredDaemonKey {
    secret: String,
}

/// Write `data` to `path` with mode 0o600 on Unix (owner-read/write only).
fn write_secret_file(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("writing secret file {}", path.display()))?;
        f.write_all(data)?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, data)
            .with_context(|| format!("writing secret file {}", path.display()))?;
    }
    Ok(())
}

/// Client-side half of the handshake: a fresh ephemeral keypair per link.
pub struct ClientHandshake {
    secret: Option<EphemeralSecret>,
    public: PublicKey,
}

impl ClientHandshake {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            secret: Some(secret),
            public,
        }
    }

    pub fn public_key(&self) -> PeerPublicKey {
        PeerPublicKey(self.public.to_bytes())
    }

    /// Consume the ephemeral secret to derive the session key against the
    /// daemon's published public key. Can only be called once.
    pub fn derive_session_key(&mut self, daemon_pub: PeerPublicKey) -> anyhow::Result<SessionKey> {
        let secret = self
            .secret
            .take()
            .ok_or_else(|| anyhow::anyhow!("ephemeral secret already consumed"))?;
        let shared = secret.diffie_hellman(&PublicKey::from(daemon_pub.0));
        Ok(derive_key(shared.as_bytes()))
    }
}

fn derive_key(shared_secret: &[u8]) -> SessionKey {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(b"paseo-relay-session-v1", &mut okm)
        .expect("32 is a valid HKDF-SHA256 output length");
    SessionKey::new(okm)
}
