//! Relay peer authorization: which pairing fingerprints this daemon trusts
//! (§4.4). Single-role, fingerprint-keyed trust model: any peer whose
//! `hello` public key hashes to a fingerprint in this file is allowed to
//! open a data link. Default is deny-all; peers are added only through the
//! `pair` CLI flow.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fingerprint::Fingerprint;

#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthorizedPeersFile {
    /// `SHA256:ab:cd:...` fingerprint → human label.
    #[serde(default)]
    peers: HashMap<String, String>,
}

/// Runtime peer allowlist, loaded from YAML and updated by the pairing flow.
#[derive(Debug, Default, Clone)]
pub struct PeerAllowlist {
    peers: HashMap<String, String>,
    /// Path updates are persisted to. `None` means in-memory only.
    path: Option<PathBuf>,
}

impl PeerAllowlist {
    /// Load from a YAML file. A missing file is an empty, deny-all allowlist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self { path: Some(path.to_path_buf()), ..Default::default() });
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let file: AuthorizedPeersFile =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self { peers: file.peers, path: Some(path.to_path_buf()) })
    }

    /// Is this fingerprint authorized to open a data link?
    pub fn is_authorized(&self, fingerprint: &Fingerprint) -> bool {
        self.peers.contains_key(fingerprint.as_str())
    }

    /// Authorize a peer and persist the change.
    pub fn add(&mut self, fingerprint: &Fingerprint, label: String) -> anyhow::Result<()> {
        self.peers.insert(fingerprint.as_str().to_string(), label.clone());
        info!(fingerprint = %fingerprint, label, "authorized relay peer");
        self.persist()
    }

    /// Revoke a peer by fingerprint. Returns whether it was present.
    pub fn revoke(&mut self, fingerprint: &Fingerprint) -> anyhow::Result<bool> {
        let removed = self.peers.remove(fingerprint.as_str()).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn persist(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else { return Ok(()) };

        let file = AuthorizedPeersFile { peers: self.peers.clone() };
        let yaml = serde_yaml::to_string(&file).context("serializing authorized peers")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating dir {}", parent.display()))?;
        }

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
                .with_context(|| format!("writing {}", path.display()))?;
            f.write_all(yaml.as_bytes())?;
        }
        #[cfg(not(unix))]
        {
            std::fs::write(path, yaml.as_bytes()).with_context(|| format!("writing {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::DaemonKeypair;

    fn fp() -> Fingerprint {
        Fingerprint::of_public_key(DaemonKeypair::generate().public_key())
    }

    #[test]
    fn missing_file_is_deny_all() {
        let dir = tempfile::tempdir().unwrap();
        let allowlist = PeerAllowlist::load(&dir.path().join("peers.yaml")).unwrap();
        assert!(!allowlist.is_authorized(&fp()));
    }

    #[test]
    fn add_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.yaml");
        let fingerprint = fp();

        let mut allowlist = PeerAllowlist::load(&path).unwrap();
        allowlist.add(&fingerprint, "phone".to_string()).unwrap();
        assert!(allowlist.is_authorized(&fingerprint));

        let reloaded = PeerAllowlist::load(&path).unwrap();
        assert!(reloaded.is_authorized(&fingerprint));
    }

    #[test]
    fn revoke_removes_peer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.yaml");
        let fingerprint = fp();

        let mut allowlist = PeerAllowlist::load(&path).unwrap();
        allowlist.add(&fingerprint, "phone".to_string()).unwrap();
        assert!(allowlist.revoke(&fingerprint).unwrap());
        assert!(!allowlist.is_authorized(&fingerprint));
        assert!(!allowlist.revoke(&fingerprint).unwrap());
    }
}
