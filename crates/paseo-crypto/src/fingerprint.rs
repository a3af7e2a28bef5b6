//! Human-verifiable fingerprints and pairing URIs for the relay bootstrap.

use sha2::{Digest, Sha256};

use crate::handshake::PeerPublicKey;

/// SHA-256 digest of a public key, rendered SSH-`SHA256:`-style as
/// colon-separated hex, for display in a QR code / pairing screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_public_key(key: PeerPublicKey) -> Self {
        let digest = Sha256::digest(key.0);
        let hex: Vec<String> = digest.iter().map(|b| format!("{b:02x}")).collect();
        Fingerprint(hex.join(":"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build a `Fingerprint` from its displayed `SHA256:ab:cd:...` or bare
    /// `ab:cd:...` text, e.g. one an operator copy-pasted or read off a
    /// pairing URI. Does not validate that the text came from an actual
    /// public key digest.
    pub fn from_display(text: &str) -> Self {
        Fingerprint(text.strip_prefix("SHA256:").unwrap_or(text).to_string())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SHA256:{}", self.0)
    }
}

/// `paseo://<daemonPeerId>/<addr>` bootstrap URI, handed out as a QR code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingUri {
    pub peer_id: String,
    pub addr: String,
}

impl PairingUri {
    pub fn parse(uri: &str) -> anyhow::Result<Self> {
        let rest = uri
            .strip_prefix("paseo://")
            .ok_or_else(|| anyhow::anyhow!("pairing URI must start with paseo://"))?;
        let (peer_id, addr) = rest
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("pairing URI must contain a peer id and address"))?;
        if peer_id.is_empty() || addr.is_empty() {
            anyhow::bail!("pairing URI peer id and address must be non-empty");
        }
        Ok(Self {
            peer_id: peer_id.to_string(),
            addr: addr.to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!("paseo://{}/{}", self.peer_id, self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::DaemonKeypair;

    #[test]
    fn fingerprint_has_sha256_prefix() {
        let daemon = DaemonKeypair::generate();
        let fp = Fingerprint::of_public_key(daemon.public_key());
        assert!(fp.to_string().starts_with("SHA256:"));
    }

    #[test]
    fn from_display_strips_prefix_and_round_trips() {
        let daemon = DaemonKeypair::generate();
        let fp = Fingerprint::of_public_key(daemon.public_key());
        let reparsed = Fingerprint::from_display(&fp.to_string());
        assert_eq!(fp, reparsed);
        assert_eq!(Fingerprint::from_display(fp.as_str()), fp);
    }

    #[test]
    fn fingerprint_has_32_colon_separated_groups() {
        let daemon = DaemonKeypair::generate();
        let fp = Fingerprint::of_public_key(daemon.public_key());
        assert_eq!(fp.as_str().split(':').count(), 32);
    }

    #[test]
    fn different_keys_yield_different_fingerprints() {
        let a = DaemonKeypair::generate();
        let b = DaemonKeypair::generate();
        assert_ne!(
            Fingerprint::of_public_key(a.public_key()),
            Fingerprint::of_public_key(b.public_key())
        );
    }

    #[test]
    fn pairing_uri_round_trips() {
        let uri = PairingUri {
            peer_id: "daemon-abc123".to_string(),
            addr: "relay.example.com:443".to_string(),
        };
        let encoded = uri.encode();
        let decoded = PairingUri::parse(&encoded).unwrap();
        assert_eq!(uri, decoded);
    }

    #[test]
    fn pairing_uri_rejects_wrong_scheme() {
        assert!(PairingUri::parse("http://daemon/addr").is_err());
    }

    #[test]
    fn pairing_uri_rejects_missing_addr() {
        assert!(PairingUri::parse("paseo://daemon-only").is_err());
    }
}
