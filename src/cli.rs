// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Parser, Debug)]
#[command(
    name = "paseo",
    about = "Local agent orchestration daemon: multiplexes UI clients onto long-running LLM coding agents",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a YAML config file, applied over the built-in defaults and
    /// any discovered `/etc`/`~/.config` layers, before `serve`'s own flags.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the daemon: local WebSocket transport, Agent Manager, and
    /// (if configured) the relay client connection.
    Serve {
        /// `host:port` the local WebSocket transport binds to.
        #[arg(long, env = "PASEO_LISTEN")]
        listen: Option<String>,
        /// Root directory for the persisted agent registry and provider state.
        #[arg(long, env = "PASEO_HOME")]
        paseo_home: Option<String>,
        /// Override for the registry file path; defaults to `<paseoHome>/agents.json`.
        #[arg(long, env = "PASEO_AGENT_REGISTRY_PATH")]
        agent_registry_path: Option<String>,
        /// Directory of static assets served alongside the WebSocket endpoint.
        #[arg(long, env = "PASEO_STATIC_DIR")]
        static_dir: Option<String>,
        /// Allowed CORS origins for the local HTTP/WS endpoint (repeatable).
        #[arg(long = "cors-allowed-origin", env = "PASEO_CORS_ALLOWED_ORIGINS", value_delimiter = ',')]
        cors_allowed_origins: Vec<String>,
    },

    /// Authorize a relay peer by pairing fingerprint.
    ///
    /// The peer's device displays a `paseo://<daemonPeerId>/<addr>` URI (or
    /// QR code). Paste it here; the fingerprint is shown for confirmation.
    Pair {
        /// The pairing URI displayed by the peer.
        uri: String,
        /// Human-readable label for this device (e.g. "my-phone").
        #[arg(long, short = 'l')]
        label: Option<String>,
    },

    /// Revoke a previously authorized relay peer by its fingerprint.
    RevokePeer {
        /// `SHA256:ab:cd:...` fingerprint, as printed by `paseo pair`.
        fingerprint: String,
    },

    /// Generate or rotate the local HTTP bearer token.
    ///
    /// The new token is printed once. The old token is immediately invalid.
    Token,

    /// Print the effective configuration and exit.
    ShowConfig,

    /// Print a shell completion script for the given shell.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
