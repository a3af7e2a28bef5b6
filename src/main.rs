// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use paseo_config::Config;
use paseo_core::{AgentManager, ClientFactory, NoopWorktreeProvisioner};
use paseo_crypto::{DaemonKeypair, Fingerprint, PairingUri, PeerAllowlist, StoredTokenFile};
use paseo_hub::{ws_handler, Hub, LocalFileExplorer, NoopGitInspector};
use paseo_provider::mock::MockAgentClient;
use paseo_relay::{ControlConnection, ControlEvent, DataLink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = paseo_config::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(&config.log_filter);

    match cli.command {
        Commands::Serve {
            listen,
            paseo_home,
            agent_registry_path,
            static_dir,
            cors_allowed_origins,
        } => {
            let config = apply_serve_overrides(
                config,
                listen,
                paseo_home,
                agent_registry_path,
                static_dir,
                cors_allowed_origins,
            );
            serve(config).await
        }
        Commands::Pair { uri, label } => pair(&config, &uri, label),
        Commands::RevokePeer { fingerprint } => revoke_peer(&config, &fingerprint),
        Commands::Token => regenerate_token(&config),
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::Completions { shell } => {
            cli::print_completions(shell);
            Ok(())
        }
    }
}

/// Respect `RUST_LOG` if set; otherwise fall back to the configured filter.
fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

/// Overlay `serve`'s CLI/env-resolved flags onto the file-layered config
/// (file < env < flag precedence — `env` is already folded into the flag's
/// resolved value by clap's own `env` attribute on each field in [`cli`]).
fn apply_serve_overrides(
    mut config: Config,
    listen: Option<String>,
    paseo_home: Option<String>,
    agent_registry_path: Option<String>,
    static_dir: Option<String>,
    cors_allowed_origins: Vec<String>,
) -> Config {
    if let Some(v) = listen {
        config.listen = v;
    }
    if let Some(v) = paseo_home {
        config.paseo_home = v;
    }
    if let Some(v) = agent_registry_path {
        config.agent_registry_path = Some(v);
    }
    if let Some(v) = static_dir {
        config.static_dir = Some(v);
    }
    if !cors_allowed_origins.is_empty() {
        config.cors_allowed_origins = cors_allowed_origins;
    }
    config
}

// ── serve ──────────────────────────────────────────────────────────────────

async fn serve(config: Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(config.paseo_home_path())
        .context("creating paseoHome directory")?;

    let mut factories: HashMap<String, ClientFactory> = HashMap::new();
    factories.insert(
        "mock".to_string(),
        Arc::new(|| Box::new(MockAgentClient::new()) as Box<dyn paseo_provider::AgentClient>),
    );

    let manager = AgentManager::new(
        config.agent_registry_path(),
        factories,
        Arc::new(NoopWorktreeProvisioner),
    )
    .context("initializing agent manager")?;

    let hub = Hub::with_outbound_queue_capacity(
        manager,
        Arc::new(NoopGitInspector),
        Arc::new(LocalFileExplorer),
        config.outbound_queue_capacity,
    );

    if config.relay.server_id.is_some() && config.relay.endpoint.is_some() {
        let relay_hub = hub.clone();
        let relay_config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = run_relay_loop(relay_config, relay_hub).await {
                tracing::error!("relay loop ended: {e:#}");
            }
        });
    } else {
        info!("relay disabled (no [relay] serverId/endpoint configured)");
    }

    let cors_layer = build_cors_layer(&config.cors_allowed_origins);

    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(hub.clone());

    if let Some(dir) = &config.static_dir {
        router = router.nest_service("/", ServeDir::new(dir));
    }

    let app = router.layer(cors_layer);

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding to {}", config.listen))?;

    info!(addr = %config.listen, "paseo daemon listening");
    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if allowed_origins.is_empty() {
        return base.allow_origin(AllowOrigin::list(Vec::<HeaderValue>::new()));
    }
    if allowed_origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return base.allow_origin(tower_http::cors::Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(hv) => Some(hv),
            Err(_) => {
                tracing::warn!(origin = %o, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(origins))
}

// ── Relay loop ───────────────────────────────────────────────────────────────

/// Connect to the configured relay under the daemon's stable `serverId` and
/// bridge every peer that shows up into its own local [`paseo_hub::Connection`]
/// (§4.4). Runs until the control connection closes; `main`'s caller just
/// logs the error and leaves the local transport running.
async fn run_relay_loop(config: Config, hub: Arc<Hub>) -> anyhow::Result<()> {
    let server_id = config.relay.server_id.clone().expect("checked by caller");
    let endpoint = config.relay.endpoint.clone().expect("checked by caller");

    let daemon_keys = Arc::new(DaemonKeypair::load_or_generate(
        &config.paseo_home_path().join("daemon_identity.yaml"),
    )?);
    let allowlist = Arc::new(tokio::sync::Mutex::new(
        PeerAllowlist::load(&peers_path(&config)).unwrap_or_default(),
    ));

    let mut control = ControlConnection::connect(&endpoint, server_id.clone()).await?;
    info!(server_id = %server_id, endpoint = %endpoint, "relay control connection established");

    while let Some(event) = control.next_event().await {
        match event? {
            ControlEvent::Connected { connection_id } => {
                let data_url = format!("{endpoint}/data/{connection_id}");
                let hub = hub.clone();
                let daemon_keys = daemon_keys.clone();
                let allowlist = allowlist.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        handle_relay_connection(&data_url, hub, &daemon_keys, &allowlist).await
                    {
                        tracing::warn!(connection_id = %connection_id, "relay data link ended: {e:#}");
                    }
                });
            }
            ControlEvent::Disconnected { connection_id } => {
                info!(connection_id = %connection_id, "relay peer disconnected");
            }
        }
    }

    anyhow::bail!("relay control connection closed")
}

async fn handle_relay_connection(
    data_url: &str,
    hub: Arc<Hub>,
    daemon_keys: &DaemonKeypair,
    allowlist: &tokio::sync::Mutex<PeerAllowlist>,
) -> anyhow::Result<()> {
    let link = DataLink::open_as_server(data_url, daemon_keys).await?;

    let fingerprint = Fingerprint::of_public_key(link.peer_public_key());
    if !allowlist.lock().await.is_authorized(&fingerprint) {
        anyhow::bail!("peer {fingerprint} is not authorized, dropping relay link");
    }

    let (mut reader, mut writer) = link.split();

    let (conn, mut out_rx) = paseo_hub::Connection::new(hub);
    conn.send_initial_state().await;

    let writer_shutdown = conn.shutdown.clone();
    let writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_shutdown.cancelled() => break,
                outbound = out_rx.recv() => match outbound {
                    Some(msg) => {
                        if writer.send(paseo_hub::encode(&msg).as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    loop {
        tokio::select! {
            _ = conn.shutdown.cancelled() => break,
            frame = reader.recv() => match frame {
                Some(Ok(bytes)) => {
                    if let Ok(text) = String::from_utf8(bytes) {
                        conn.handle_text(&text).await;
                    }
                }
                Some(Err(_)) | None => break,
            },
        }
    }

    conn.shutdown.cancel();
    let _ = writer_task.await;
    Ok(())
}

// ── Pairing / token subcommands ──────────────────────────────────────────────

fn peers_path(config: &Config) -> std::path::PathBuf {
    config.paseo_home_path().join("peers.yaml")
}

fn token_path(config: &Config) -> std::path::PathBuf {
    config.paseo_home_path().join("token.yaml")
}

/// Authorize a relay peer from a `paseo://<fingerprint>/<addr>` pairing URI.
///
/// The generic [`PairingUri`] carries a fingerprint string in its `peer_id`
/// field rather than a stable libp2p-style identity — this daemon's relay
/// peers have no long-term identity beyond the ephemeral handshake key their
/// fingerprint is derived from.
fn pair(config: &Config, uri: &str, label: Option<String>) -> anyhow::Result<()> {
    let pairing = PairingUri::parse(uri)?;
    let fingerprint = Fingerprint::from_display(&pairing.peer_id);

    println!("Fingerprint:   {fingerprint}");
    println!("Address:       {}", pairing.addr);
    println!();

    let label = label.unwrap_or_else(|| "paired-device".to_string());
    print!("Authorize this peer (label: {label})? [y/N] ");
    std::io::Write::flush(&mut std::io::stdout()).ok();

    let stdin = std::io::stdin();
    let line = stdin.lock().lines().next().unwrap_or(Ok(String::new()))?;

    if line.trim().eq_ignore_ascii_case("y") {
        std::fs::create_dir_all(config.paseo_home_path()).context("creating paseoHome directory")?;
        let mut allowlist = PeerAllowlist::load(&peers_path(config)).unwrap_or_default();
        allowlist.add(&fingerprint, label.clone())?;
        println!("Peer authorized: {label}");
    } else {
        println!("Pairing cancelled.");
    }

    Ok(())
}

fn revoke_peer(config: &Config, fingerprint: &str) -> anyhow::Result<()> {
    let fingerprint = Fingerprint::from_display(fingerprint);
    let mut allowlist = PeerAllowlist::load(&peers_path(config)).unwrap_or_default();

    if allowlist.revoke(&fingerprint)? {
        println!("Peer {fingerprint} revoked");
    } else {
        println!("Peer {fingerprint} was not in the allowlist");
    }
    Ok(())
}

fn regenerate_token(config: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(config.paseo_home_path()).context("creating paseoHome directory")?;
    let raw = StoredTokenFile::generate_and_save(&token_path(config))?;
    println!("New bearer token (save it now — it won't be shown again):");
    println!("  {}", raw.as_str());
    println!();
    println!("Usage:  Authorization: Bearer {}", raw.as_str());
    Ok(())
}
