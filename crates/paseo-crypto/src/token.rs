//! Bearer token generation and secure storage.
//!
//! Raw tokens are **never persisted**. They are shown to the operator once
//! at generation time, then immediately hashed; only the SHA-256 digest is
//! stored on disk. All comparisons use [`subtle::ConstantTimeEq`] to avoid
//! timing oracles.

use std::path::Path;

use anyhow::Context;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// A raw bearer token — displayed to the operator **exactly once**.
#[derive(Debug)]
#[must_use = "display this token to the operator, then call into_stored()"]
pub struct RawToken(String);

impl RawToken {
    /// Generate a cryptographically random 256-bit token (43 base64url chars).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        RawToken(base64url_encode(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_stored(self) -> StoredToken {
        StoredToken(sha256(self.0.as_bytes()))
    }
}

impl std::fmt::Display for RawToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The stored form of a bearer token — only the SHA-256 digest is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken(#[serde(with = "hex_bytes")] [u8; 32]);

impl StoredToken {
    /// Verify a provided token string in constant time.
    pub fn verify(&self, provided: &str) -> bool {
        let provided_hash = sha256(provided.as_bytes());
        bool::from(provided_hash.ct_eq(&self.0))
    }
}

/// On-disk YAML format for the token file, e.g. `~/.config/paseo/token.yaml`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredTokenFile {
    pub token_hash: StoredToken,
}

impl StoredTokenFile {
    /// Generate a new token, write its hash to `path` (mode 0600), and
    /// return the raw token so the caller can display it once.
    pub fn generate_and_save(path: &Path) -> anyhow::Result<RawToken> {
        let raw = RawToken::generate();
        let raw_str = raw.as_str().to_string();
        let stored = raw.into_stored();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating token directory {}", parent.display()))?;
        }

        let file = StoredTokenFile { token_hash: stored };
        let yaml = serde_yaml::to_string(&file).context("serializing token file")?;
        write_secret_file(path, yaml.as_bytes())?;

        Ok(RawToken(raw_str))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading token file {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("parsing token file {}", path.display()))
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
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

fn base64url_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected 32-byte hex"))
    }
}
