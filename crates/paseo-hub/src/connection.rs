//! The Session hub (§4.3): maps wire messages onto `AgentManager`/
//! `AgentHandle` operations and rebroadcasts `ManagerEvent`s to every
//! subscribed connection. Transport-agnostic half of a reader/writer split
//! — `ws.rs` supplies the actual socket, this module only ever sees parsed
//! frames and an outbound queue to push onto.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use paseo_core::{AgentManager, CreateAgentConfig, Direction, GitOptions, ManagerEvent, TimelineVariant};
use paseo_provider::PersistenceBlob;

use crate::collaborators::{explore, FileExplorer, GitInspector};
use crate::wire::{
    AgentStreamEvent, InboundMessage, OutboundMessage, PermissionRequestWire, ResumeHandleWire, StatusWire,
    UpdateKindWire,
};

/// Default outbound queue capacity (§4.3 "Backpressure") when a caller
/// builds a `Hub` without overriding it from `paseo-config`.
const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Everything a `Connection` needs to reach the rest of the daemon. One
/// `Hub` is shared across every connection.
pub struct Hub {
    pub manager: Arc<AgentManager>,
    pub git: Arc<dyn GitInspector>,
    pub files: Arc<dyn FileExplorer>,
    outbound_queue_capacity: usize,
}

impl Hub {
    pub fn new(manager: Arc<AgentManager>, git: Arc<dyn GitInspector>, files: Arc<dyn FileExplorer>) -> Arc<Self> {
        Self::with_outbound_queue_capacity(manager, git, files, DEFAULT_OUTBOUND_QUEUE_CAPACITY)
    }

    /// Build a `Hub` with a caller-chosen per-connection outbound queue
    /// capacity (§4.3 "Backpressure"), e.g. from the daemon's configured
    /// `outboundQueueCapacity`.
    pub fn with_outbound_queue_capacity(
        manager: Arc<AgentManager>,
        git: Arc<dyn GitInspector>,
        files: Arc<dyn FileExplorer>,
        outbound_queue_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self { manager, git, files, outbound_queue_capacity })
    }
}

/// `None` means "every agent"; `Some(id)` narrows the subscription (§4.3).
type SubscriptionTable = Arc<Mutex<HashMap<String, Option<String>>>>;

/// One hub session, independent of whatever transport carries its bytes.
/// Owns the outbound queue and the background task that bridges
/// `ManagerEvent` broadcasts into this connection's subscriptions.
pub struct Connection {
    hub: Arc<Hub>,
    out: mpsc::Sender<OutboundMessage>,
    subscriptions: SubscriptionTable,
    pub shutdown: CancellationToken,
    bridge: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Build a connection and its outbound queue. The caller (a transport
    /// adapter like `ws.rs`) owns the returned receiver and is responsible
    /// for draining it onto the wire; the returned `shutdown` token fires
    /// once this connection is disconnected for being a slow consumer.
    pub fn new(hub: Arc<Hub>) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (out, rx) = mpsc::channel(hub.outbound_queue_capacity);
        let subscriptions: SubscriptionTable = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let bridge = tokio::spawn(bridge_task(
            hub.manager.subscribe(),
            out.clone(),
            subscriptions.clone(),
            shutdown.clone(),
        ));

        (Self { hub, out, subscriptions, shutdown, bridge }, rx)
    }

    /// Parse and dispatch one inbound text frame. Malformed input is never
    /// fatal (§7): it is reported back as `status{error}`.
    pub async fn handle_text(&self, text: &str) {
        let envelope: crate::wire::InboundEnvelope = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                self.send(OutboundMessage::Status {
                    status: StatusWire::Error,
                    request_id: None,
                    agent_id: None,
                    error: Some(format!("malformed message: {e}")),
                })
                .await;
                return;
            }
        };
        self.dispatch(envelope.message).await;
    }

    async fn send(&self, msg: OutboundMessage) -> bool {
        if self.out.try_send(msg).is_err() {
            warn!("connection outbound queue full, disconnecting as a slow consumer");
            self.shutdown.cancel();
            false
        } else {
            true
        }
    }

    async fn status_ok(&self, request_id: Option<String>, agent_id: Option<String>) {
        self.send(OutboundMessage::Status { status: StatusWire::Ok, request_id, agent_id, error: None }).await;
    }

    async fn status_err(&self, request_id: Option<String>, agent_id: Option<String>, error: impl ToString) {
        self.send(OutboundMessage::Status {
            status: StatusWire::Error,
            request_id,
            agent_id,
            error: Some(error.to_string()),
        })
        .await;
    }

    async fn dispatch(&self, message: InboundMessage) {
        match message {
            InboundMessage::SubscribeAgentsRequest { subscription_id, agent_id } => {
                self.subscriptions.lock().await.insert(subscription_id, agent_id.clone());
                self.send_session_state().await;
                self.send_snapshots(agent_id).await;
            }
            InboundMessage::UnsubscribeAgentsRequest { subscription_id } => {
                self.subscriptions.lock().await.remove(&subscription_id);
            }
            InboundMessage::CreateAgentRequest { config, git, request_id } => {
                let result = self
                    .hub
                    .manager
                    .create(CreateAgentConfig {
                        provider: config.provider,
                        cwd: PathBuf::from(config.cwd),
                        title: config.title,
                        mode_id: config.mode_id,
                        git: GitOptions { create_worktree: git.create_worktree },
                    })
                    .await;
                match result {
                    Ok(snapshot) => self.status_ok(request_id, Some(snapshot.id)).await,
                    Err(e) => self.status_err(request_id, None, e).await,
                };
            }
            InboundMessage::ResumeAgentRequest { handle, overrides, request_id } => {
                let ResumeHandleWire { id, provider, cwd, persistence } = handle;
                let (title, mode_id) = overrides
                    .map(|o| (o.title, o.mode_id))
                    .unwrap_or((None, None));
                let result = self
                    .hub
                    .manager
                    .resume(id, provider, PathBuf::from(cwd), title, mode_id, PersistenceBlob(persistence))
                    .await;
                match result {
                    Ok(snapshot) => self.status_ok(request_id, Some(snapshot.id)).await,
                    Err(e) => self.status_err(request_id, None, e).await,
                };
            }
            InboundMessage::InitializeAgentRequest { agent_id, request_id } => {
                let result = self.hub.manager.initialize(&agent_id).await;
                match result {
                    Ok(snapshot) => self.status_ok(request_id, Some(snapshot.id)).await,
                    Err(e) => self.status_err(request_id, Some(agent_id), e).await,
                };
            }
            InboundMessage::RefreshAgentRequest { agent_id, request_id } => {
                let result = self.hub.manager.refresh(&agent_id).await;
                match result {
                    Ok(snapshot) => self.status_ok(request_id, Some(snapshot.id)).await,
                    Err(e) => self.status_err(request_id, Some(agent_id), e).await,
                };
            }
            InboundMessage::SendAgentMessage { agent_id, text, message_id, images, send_now } => {
                match self.hub.manager.handle(&agent_id).await {
                    Some(handle) => {
                        if send_now {
                            handle.send_now(None, Some(message_id), text, images).await;
                        } else {
                            handle.submit(None, Some(message_id), text, images).await;
                        }
                    }
                    None => self.status_err(None, Some(agent_id.clone()), "unknown agent").await,
                }
            }
            InboundMessage::CancelAgentRequest { agent_id } => match self.hub.manager.handle(&agent_id).await {
                Some(handle) => handle.cancel().await,
                None => self.status_err(None, Some(agent_id), "unknown agent").await,
            },
            InboundMessage::DeleteAgentRequest { agent_id } => {
                if let Err(e) = self.hub.manager.delete(&agent_id).await {
                    self.status_err(None, Some(agent_id), e).await;
                }
            }
            InboundMessage::SetAgentMode { agent_id, mode_id } => match self.hub.manager.handle(&agent_id).await {
                Some(handle) => {
                    if let Err(e) = handle.set_mode(mode_id).await {
                        self.status_err(None, Some(agent_id), e).await;
                    }
                }
                None => self.status_err(None, Some(agent_id), "unknown agent").await,
            },
            InboundMessage::AgentPermissionResponse { agent_id, request_id, response } => {
                match self.hub.manager.handle(&agent_id).await {
                    Some(handle) => {
                        let decision: paseo_provider::PermissionDecision = response.into();
                        handle.respond_permission(request_id.clone(), decision).await;
                        self.send(OutboundMessage::AgentPermissionResolved { agent_id, request_id }).await;
                    }
                    None => self.status_err(Some(request_id), Some(agent_id), "unknown agent").await,
                }
            }
            InboundMessage::GitRepoInfoRequest { cwd, request_id } => {
                match self.hub.git.repo_info(std::path::Path::new(&cwd)).await {
                    Ok(info) => {
                        self.send(OutboundMessage::GitRepoInfoResponse { request_id, info }).await;
                    }
                    Err(e) => self.status_err(Some(request_id), None, e).await,
                }
            }
            InboundMessage::GitDiffRequest { agent_id, request_id } => {
                match self.hub.manager.get(&agent_id).await {
                    Some(snapshot) => match self.hub.git.diff(&snapshot.cwd).await {
                        Ok(diff) => {
                            self.send(OutboundMessage::GitDiffResponse { request_id, diff }).await;
                        }
                        Err(e) => self.status_err(request_id, Some(agent_id), e).await,
                    },
                    None => self.status_err(request_id, Some(agent_id), "unknown agent").await,
                }
            }
            InboundMessage::FileExplorerRequest { agent_id, path, mode, request_id } => {
                match self.hub.manager.get(&agent_id).await {
                    Some(snapshot) => {
                        let full_path = snapshot.cwd.join(path);
                        match explore(self.hub.files.as_ref(), &full_path, mode).await {
                            Ok(result) => {
                                self.send(OutboundMessage::FileExplorerResponse { request_id, result }).await;
                            }
                            Err(e) => self.status_err(request_id, Some(agent_id), e).await,
                        }
                    }
                    None => self.status_err(request_id, Some(agent_id), "unknown agent").await,
                }
            }
            InboundMessage::FetchAgentTimelineRequest { agent_id, direction, limit, cursor, request_id } => {
                match self.hub.manager.handle(&agent_id).await {
                    Some(handle) => {
                        let entries = handle.timeline_range(direction.into(), limit, cursor).await;
                        self.send(OutboundMessage::FetchAgentTimelineResponse { request_id, entries }).await;
                    }
                    None => self.status_err(Some(request_id), Some(agent_id), "unknown agent").await,
                }
            }
        }
    }

    /// Send the initial `session_state` a transport issues right after
    /// accept, before any subscription exists (§4.4).
    pub async fn send_initial_state(&self) {
        self.send_session_state().await;
    }

    async fn send_session_state(&self) {
        let agents = self.hub.manager.list().await;
        self.send(OutboundMessage::SessionState { agents }).await;
    }

    /// Send an `agent_stream_snapshot` for every agent this subscription
    /// should catch up on — just `narrowed_to` if set, otherwise every
    /// currently-live agent (§4.3 "subscription model").
    async fn send_snapshots(&self, narrowed_to: Option<String>) {
        let ids: Vec<String> = match narrowed_to {
            Some(id) => vec![id],
            None => self.hub.manager.list().await.into_iter().map(|a| a.id).collect(),
        };
        for id in ids {
            if let Some(handle) = self.hub.manager.handle(&id).await {
                let events = handle.timeline_range(Direction::Forward, usize::MAX, None).await;
                self.send(OutboundMessage::AgentStreamSnapshot { agent_id: id, events }).await;
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.bridge.abort();
    }
}

/// Forwards every `ManagerEvent` the manager broadcasts into this
/// connection's outbound queue, filtered by its current subscriptions.
/// Runs until the connection shuts down or the manager's broadcast channel
/// closes.
async fn bridge_task(
    mut events: tokio::sync::broadcast::Receiver<ManagerEvent>,
    out: mpsc::Sender<OutboundMessage>,
    subscriptions: SubscriptionTable,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => {
                let agent_id = event_agent_id(&event);
                let interested = {
                    let subs = subscriptions.lock().await;
                    subs.values().any(|narrow| narrow.as_deref().map_or(true, |id| Some(id) == agent_id.as_deref()))
                };
                if !interested {
                    continue;
                }
                let outbound = match event {
                    ManagerEvent::Upsert(agent) => OutboundMessage::AgentUpdate { kind: UpdateKindWire::Upsert, agent },
                    ManagerEvent::Delete(agent_id) => OutboundMessage::AgentDeleted { agent_id },
                    ManagerEvent::Timeline { agent_id, entry } => {
                        if let TimelineVariant::PermissionRequest { id, kind, title, input } = &entry.variant {
                            let permission_request = OutboundMessage::AgentPermissionRequest {
                                agent_id: agent_id.clone(),
                                request: PermissionRequestWire {
                                    id: id.clone(),
                                    kind: *kind,
                                    title: title.clone(),
                                    input: input.clone(),
                                },
                            };
                            if out.try_send(permission_request).is_err() {
                                warn!("connection outbound queue full, disconnecting as a slow consumer");
                                shutdown.cancel();
                                break;
                            }
                        }
                        OutboundMessage::AgentStream {
                            agent_id,
                            event: AgentStreamEvent::Timeline { entry: entry.clone() },
                            timestamp: entry.timestamp,
                        }
                    }
                };
                if out.try_send(outbound).is_err() {
                    warn!("connection outbound queue full, disconnecting as a slow consumer");
                    shutdown.cancel();
                    break;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!(lagged = n, "hub subscriber lagged behind manager events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn event_agent_id(event: &ManagerEvent) -> Option<String> {
    match event {
        ManagerEvent::Upsert(agent) => Some(agent.id.clone()),
        ManagerEvent::Delete(id) => Some(id.clone()),
        ManagerEvent::Timeline { agent_id, .. } => Some(agent_id.clone()),
    }
}
