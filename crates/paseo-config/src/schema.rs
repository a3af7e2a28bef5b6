use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should default to enabled need a named
/// function instead.
fn default_true() -> bool {
    true
}

fn default_listen() -> String {
    "127.0.0.1:4455".to_string()
}

fn default_paseo_home() -> String {
    "~/.local/share/paseo".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_backpressure_capacity() -> usize {
    256
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `host:port` the local WebSocket transport binds to.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Root directory for the persisted agent registry and provider state.
    #[serde(default = "default_paseo_home")]
    pub paseo_home: String,
    /// Override for the registry file path; defaults to `<paseoHome>/agents.json`.
    pub agent_registry_path: Option<String>,
    /// Directory of static assets served alongside the WebSocket endpoint.
    /// Out of scope for the core (§1); accepted here only for CLI parity.
    pub static_dir: Option<String>,
    /// Allowed CORS origins for the local HTTP/WS endpoint.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
    /// Bounded per-connection outbound queue capacity before a connection
    /// is closed with `SlowConsumer` (§4.3).
    #[serde(default = "default_backpressure_capacity")]
    pub outbound_queue_capacity: usize,
    /// `tracing_subscriber::EnvFilter` directive, overridable by `RUST_LOG`.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub relay: RelayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            paseo_home: default_paseo_home(),
            agent_registry_path: None,
            static_dir: None,
            cors_allowed_origins: Vec::new(),
            outbound_queue_capacity: default_backpressure_capacity(),
            log_filter: default_log_filter(),
            relay: RelayConfig::default(),
        }
    }
}

impl Config {
    /// Resolved `paseoHome` with `~` expanded.
    pub fn paseo_home_path(&self) -> std::path::PathBuf {
        expand_home(&self.paseo_home)
    }

    /// Resolved registry file path.
    pub fn agent_registry_path(&self) -> std::path::PathBuf {
        match &self.agent_registry_path {
            Some(p) => expand_home(p),
            None => self.paseo_home_path().join("agents.json"),
        }
    }
}

/// Relay client configuration (§4.4). Disabled unless `server_id` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Rendezvous WebSocket URL, e.g. `wss://relay.example.com/connect`.
    pub endpoint: Option<String>,
    /// Stable identifier this daemon announces itself under.
    pub server_id: Option<String>,
    /// Enable automatic reconnect on relay disconnect.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
}

fn expand_home(path: &str) -> std::path::PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    std::path::PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_listen_addr() {
        let cfg = Config::default();
        assert_eq!(cfg.listen, "127.0.0.1:4455");
    }

    #[test]
    fn registry_path_defaults_under_paseo_home() {
        let mut cfg = Config::default();
        cfg.paseo_home = "/tmp/paseo-test-home".to_string();
        assert_eq!(
            cfg.agent_registry_path(),
            std::path::PathBuf::from("/tmp/paseo-test-home/agents.json")
        );
    }

    #[test]
    fn explicit_registry_path_overrides_default() {
        let mut cfg = Config::default();
        cfg.agent_registry_path = Some("/tmp/custom-registry.json".to_string());
        assert_eq!(
            cfg.agent_registry_path(),
            std::path::PathBuf::from("/tmp/custom-registry.json")
        );
    }

    #[test]
    fn relay_disabled_by_default() {
        let cfg = Config::default();
        assert!(cfg.relay.server_id.is_none());
    }
}
