use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use paseo_provider::{AgentClient, Capabilities, ModeDescriptor, PermissionDecision, PersistenceBlob, Usage};

use crate::error::CoreError;
use crate::events::ManagerEvent;
use crate::timeline::{AppendHook, Direction, Timeline, TimelineEntry};
use crate::turn::{
    cancel_all_pending, drive, new_pending_gates, resolve_pending, QueuedInput, SharedClient,
    SharedTimeline, Turn, TurnOutcome, TurnQueue,
};

/// Grace period given to a provider to honor a cooperative cancel before the
/// Turn is forcibly ended (§5 "Cancellation").
const CANCEL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Creating,
    Idle,
    Running,
    Cancelling,
    Error,
}

/// The Agent's immutable public view (§4.1 `snapshot()`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub provider: String,
    pub cwd: PathBuf,
    pub status: AgentStatus,
    pub title: Option<String>,
    pub current_mode_id: Option<String>,
    pub available_modes: Vec<ModeDescriptor>,
    pub last_activity_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub last_usage: Option<Usage>,
}

enum Command {
    Submit {
        request_id: Option<String>,
        message_id: Option<String>,
        text: String,
        images: Vec<String>,
        send_now: bool,
    },
    Cancel,
    RespondPermission {
        id: String,
        decision: PermissionDecision,
    },
    SetMode {
        mode_id: String,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    Snapshot {
        reply: oneshot::Sender<AgentSnapshot>,
    },
    TimelineRange {
        direction: Direction,
        limit: usize,
        cursor: Option<u64>,
        reply: oneshot::Sender<Vec<TimelineEntry>>,
    },
    Shutdown {
        reply: oneshot::Sender<anyhow::Result<PersistenceBlob>>,
    },
    WorktreeSetupStarted,
    WorktreeSetupFinished {
        output: String,
        is_error: bool,
    },
}

/// The `call_id` the Agent Manager's synthetic worktree-setup progress
/// reports under (§4.2 "Worktree post-creation setup").
const WORKTREE_SETUP_CALL_ID: &str = "paseo_worktree_setup";

/// A handle to a running Agent actor's mailbox. Cheap to clone; every method
/// sends one `Command` and (where relevant) awaits its reply, so callers
/// never touch the Agent's internals directly (§9 "agent = actor with a
/// mailbox").
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<Command>,
}

impl AgentHandle {
    pub async fn submit(&self, request_id: Option<String>, message_id: Option<String>, text: String, images: Vec<String>) {
        let _ = self
            .tx
            .send(Command::Submit { request_id, message_id, text, images, send_now: false })
            .await;
    }

    pub async fn send_now(&self, request_id: Option<String>, message_id: Option<String>, text: String, images: Vec<String>) {
        let _ = self
            .tx
            .send(Command::Submit { request_id, message_id, text, images, send_now: true })
            .await;
    }

    pub async fn cancel(&self) {
        let _ = self.tx.send(Command::Cancel).await;
    }

    pub async fn respond_permission(&self, id: String, decision: PermissionDecision) {
        let _ = self.tx.send(Command::RespondPermission { id, decision }).await;
    }

    pub async fn set_mode(&self, mode_id: String) -> Result<(), CoreError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::SetMode { mode_id, reply }).await;
        rx.await.unwrap_or(Err(CoreError::UnknownAgent("agent shut down".into())))
    }

    pub async fn snapshot(&self) -> Option<AgentSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot { reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn timeline_range(&self, direction: Direction, limit: usize, cursor: Option<u64>) -> Vec<TimelineEntry> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::TimelineRange { direction, limit, cursor, reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn shutdown(&self) -> anyhow::Result<PersistenceBlob> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| anyhow::anyhow!("agent mailbox already closed"))?;
        rx.await.map_err(|_| anyhow::anyhow!("agent task dropped before replying"))?
    }

    /// Record the start of the Agent Manager's asynchronous worktree
    /// post-creation setup as a synthetic, running tool call (§4.2).
    pub async fn note_worktree_setup_started(&self) {
        let _ = self.tx.send(Command::WorktreeSetupStarted).await;
    }

    /// Resolve the synthetic worktree-setup tool call with its captured
    /// output.
    pub async fn note_worktree_setup_finished(&self, output: String, is_error: bool) {
        let _ = self.tx.send(Command::WorktreeSetupFinished { output, is_error }).await;
    }
}

struct AgentState {
    id: String,
    provider: String,
    cwd: PathBuf,
    status: AgentStatus,
    title: Option<String>,
    current_mode_id: Option<String>,
    available_modes: Vec<ModeDescriptor>,
    last_activity_at: DateTime<Utc>,
    last_error: Option<String>,
    last_usage: Option<Usage>,
    timeline: SharedTimeline,
    queue: TurnQueue,
}

impl AgentState {
    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id.clone(),
            provider: self.provider.clone(),
            cwd: self.cwd.clone(),
            status: self.status,
            title: self.title.clone(),
            current_mode_id: self.current_mode_id.clone(),
            available_modes: self.available_modes.clone(),
            last_activity_at: self.last_activity_at,
            last_error: self.last_error.clone(),
            last_usage: self.last_usage.clone(),
        }
    }

    fn mode(&self) -> ModeDescriptor {
        self.available_modes
            .iter()
            .find(|m| Some(&m.id) == self.current_mode_id.as_ref())
            .cloned()
            .or_else(|| self.available_modes.first().cloned())
            .expect("handshake always returns at least one mode")
    }
}

/// Everything spawn() needs to announce lifecycle state to the Agent Manager
/// (§4.2 "Each emits an `agent_update{kind}` event" and "writes an atomic
/// snapshot of the registry" after every `turn_completed`).
#[derive(Clone)]
pub struct Announce {
    pub events: broadcast::Sender<ManagerEvent>,
    pub persist: mpsc::UnboundedSender<paseo_store::AgentRecord>,
}

fn record_for(state: &AgentState, persistence: PersistenceBlob) -> paseo_store::AgentRecord {
    paseo_store::AgentRecord {
        id: state.id.clone(),
        provider: state.provider.clone(),
        cwd: state.cwd.clone(),
        title: state.title.clone(),
        mode_id: state.current_mode_id.clone(),
        last_activity_at: state.last_activity_at,
        persistence,
    }
}

/// Spawn an Agent actor for an already-handshaken provider client, returning
/// a handle callers use to drive it. The actor task is the Agent's single
/// serial executor (§5): all timeline/queue/status mutation happens inside
/// this one task, so invariant 1 ("at most one Turn per Agent") holds by
/// construction.
pub fn spawn(
    id: String,
    provider: String,
    cwd: PathBuf,
    title: Option<String>,
    capabilities: Capabilities,
    current_mode_id: Option<String>,
    client: Box<dyn AgentClient>,
    announce: Announce,
) -> AgentHandle {
    let (tx, mut rx) = mpsc::channel::<Command>(64);
    let client: SharedClient = Arc::new(Mutex::new(client));
    let mode_id = current_mode_id.or_else(|| capabilities.modes.first().map(|m| m.id.clone()));

    let timeline_events = announce.events.clone();
    let timeline_agent_id = id.clone();
    let timeline_hook: AppendHook = Arc::new(move |entry| {
        let _ = timeline_events.send(ManagerEvent::Timeline {
            agent_id: timeline_agent_id.clone(),
            entry,
        });
    });

    let mut state = AgentState {
        id: id.clone(),
        provider,
        cwd,
        status: AgentStatus::Idle,
        title,
        current_mode_id: mode_id,
        available_modes: capabilities.modes,
        last_activity_at: Utc::now(),
        last_error: None,
        last_usage: None,
        timeline: Arc::new(Mutex::new(Timeline::with_hook(timeline_hook))),
        queue: TurnQueue::new(),
    };

    let _ = announce.events.send(ManagerEvent::Upsert(state.snapshot()));

    tokio::spawn(async move {
        let mut current_turn: Option<Turn> = None;

        loop {
            if let Some(turn) = current_turn.take() {
                let mode = state.mode();
                let queued = state
                    .queue
                    .pop_front()
                    .expect("a turn is only started for a queued input");
                let pending = new_pending_gates();
                let client_for_drive = client.clone();
                let timeline_for_drive = state.timeline.clone();

                // Race the drive loop against the mailbox so cancel/respond
                // commands land while the provider is mid-turn (§5
                // "Suspension points"). Everything `driving` touches is
                // reached through an `Arc<Mutex<_>>`, so it never holds a
                // borrow of `state` across the await.
                tokio::pin! {
                    let driving = drive(&client_for_drive, &timeline_for_drive, &pending, &mode, &turn, queued.text, queued.images);
                }
                let outcome = loop {
                    tokio::select! {
                        biased;
                        cmd = rx.recv() => match cmd {
                            Some(cmd) => {
                                if handle_while_running(cmd, &mut state, &pending, &client).await {
                                    return;
                                }
                            }
                            None => return,
                        },
                        outcome = &mut driving => break outcome,
                    }
                };

                match outcome {
                    TurnOutcome::Completed { usage } => {
                        state.last_usage = usage;
                        state.last_error = None;
                    }
                    TurnOutcome::Errored { message } => {
                        warn!(agent = %state.id, %message, "turn ended with an error");
                        state.last_error = Some(message);
                    }
                }
                state.last_activity_at = Utc::now();
                if let Some(next) = state.queue.front() {
                    state.status = AgentStatus::Running;
                    current_turn = Some(Turn::new(next.request_id.clone()));
                } else {
                    state.status = AgentStatus::Idle;
                }
                info!(agent = %state.id, status = ?state.status, "turn finished");

                let blob = client.lock().await.export_persistence().await;
                let _ = announce.persist.send(record_for(&state, blob));
                let _ = announce.events.send(ManagerEvent::Upsert(state.snapshot()));
                continue;
            }

            match rx.recv().await {
                Some(cmd) => {
                    if !handle_idle(cmd, &mut state, &mut current_turn, &client).await {
                        return;
                    }
                    let _ = announce.events.send(ManagerEvent::Upsert(state.snapshot()));
                }
                None => return,
            }
        }
    });

    AgentHandle { tx }
}

/// Handle a mailbox command while no Turn is active: either it starts one
/// (by queueing it and letting the outer loop notice a non-empty queue) or
/// it's a read/administrative operation handled inline.
async fn handle_idle(
    cmd: Command,
    state: &mut AgentState,
    current_turn: &mut Option<Turn>,
    client: &SharedClient,
) -> bool {
    match cmd {
        Command::Submit { request_id, message_id, text, images, send_now } => {
            let item = QueuedInput { request_id: request_id.clone(), message_id, text, images };
            if send_now {
                state.queue.send_now(item);
            } else {
                state.queue.push_back(item);
            }
            state.status = AgentStatus::Running;
            *current_turn = Some(Turn::new(request_id));
            true
        }
        Command::Cancel => {
            debug!(agent = %state.id, "cancel requested with no active turn");
            true
        }
        Command::RespondPermission { id, .. } => {
            warn!(agent = %state.id, %id, "permission response for an agent with no active turn");
            true
        }
        Command::SetMode { mode_id, reply } => {
            let result = apply_mode_change(state, &mode_id);
            let _ = reply.send(result);
            true
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(state.snapshot());
            true
        }
        Command::TimelineRange { direction, limit, cursor, reply } => {
            let entries = state.timeline.lock().await.range(direction, limit, cursor);
            let _ = reply.send(entries);
            true
        }
        Command::Shutdown { reply } => {
            let blob = client.lock().await.export_persistence().await;
            let _ = client.lock().await.shutdown().await;
            let _ = reply.send(blob);
            false
        }
        Command::WorktreeSetupStarted => {
            start_worktree_setup_entry(state).await;
            true
        }
        Command::WorktreeSetupFinished { output, is_error } => {
            finish_worktree_setup_entry(state, output, is_error).await;
            true
        }
    }
}

async fn start_worktree_setup_entry(state: &AgentState) {
    use crate::timeline::TimelineVariant;
    state.timeline.lock().await.append(TimelineVariant::ToolCall {
        call_id: WORKTREE_SETUP_CALL_ID.to_string(),
        name: WORKTREE_SETUP_CALL_ID.to_string(),
        status: crate::timeline::ToolCallStatus::Running,
        input: serde_json::Value::Null,
        output: None,
        kind: paseo_provider::PermissionKind::Command,
    });
}

async fn finish_worktree_setup_entry(state: &AgentState, output: String, is_error: bool) {
    let status = if is_error {
        crate::timeline::ToolCallStatus::Errored
    } else {
        crate::timeline::ToolCallStatus::Completed
    };
    state
        .timeline
        .lock()
        .await
        .update_tool_call(WORKTREE_SETUP_CALL_ID, status, Some(output));
}

/// Handle a mailbox command while a Turn is mid-flight. Returns `true` if
/// the agent task should terminate (only `Shutdown` does this; it cancels
/// the live turn first so the provider is released deterministically).
async fn handle_while_running(
    cmd: Command,
    state: &mut AgentState,
    pending: &crate::turn::PendingGates,
    client: &SharedClient,
) -> bool {
    match cmd {
        Command::Submit { request_id, message_id, text, images, send_now } => {
            let item = QueuedInput { request_id, message_id, text, images };
            if send_now {
                state.queue.send_now(item);
            } else {
                state.queue.push_back(item);
            }
            false
        }
        Command::Cancel => {
            state.status = AgentStatus::Cancelling;
            info!(agent = %state.id, "cancelling active turn");
            let _ = tokio::time::timeout(CANCEL_GRACE, client.lock().await.cancel()).await;
            cancel_all_pending(pending).await;
            false
        }
        Command::RespondPermission { id, decision } => {
            if !resolve_pending(pending, &id, decision).await {
                warn!(agent = %state.id, %id, "permission response for an unknown or already-resolved id");
            }
            false
        }
        Command::SetMode { mode_id, reply } => {
            // Takes effect at the start of the next permission decision,
            // never mid-check (§4.1 tie-break): safe to apply immediately
            // since in-flight gates already captured their policy snapshot.
            let result = apply_mode_change(state, &mode_id);
            let _ = reply.send(result);
            false
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(state.snapshot());
            false
        }
        Command::TimelineRange { direction, limit, cursor, reply } => {
            let entries = state.timeline.lock().await.range(direction, limit, cursor);
            let _ = reply.send(entries);
            false
        }
        Command::Shutdown { reply } => {
            let _ = tokio::time::timeout(CANCEL_GRACE, client.lock().await.cancel()).await;
            cancel_all_pending(pending).await;
            let blob = client.lock().await.export_persistence().await;
            let _ = client.lock().await.shutdown().await;
            let _ = reply.send(blob);
            true
        }
        Command::WorktreeSetupStarted => {
            start_worktree_setup_entry(state).await;
            false
        }
        Command::WorktreeSetupFinished { output, is_error } => {
            finish_worktree_setup_entry(state, output, is_error).await;
            false
        }
    }
}

fn apply_mode_change(state: &mut AgentState, mode_id: &str) -> Result<(), CoreError> {
    if !state.available_modes.iter().any(|m| m.id == mode_id) {
        return Err(CoreError::UnsupportedMode(mode_id.to_string()));
    }
    state.current_mode_id = Some(mode_id.to_string());
    Ok(())
}

/// Drives a spawned Agent (via `AgentManager`, not the mock client directly)
/// through full turns, so the actor loop's queue-draining and mode-gating
/// logic is actually exercised end to end (scenarios 2, 4, 5).
#[cfg(test)]
mod integration {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use paseo_provider::mock::MockAgentClient;

    use paseo_provider::PermissionDecision;

    use crate::manager::{AgentManager, ClientFactory, CreateAgentConfig, GitOptions, NoopWorktreeProvisioner};
    use crate::timeline::{Direction, TimelineVariant};
    use crate::AgentStatus;
    use super::AgentHandle;

    fn factories() -> HashMap<String, ClientFactory> {
        let mut map: HashMap<String, ClientFactory> = HashMap::new();
        map.insert("mock".to_string(), Arc::new(|| Box::new(MockAgentClient::new()) as Box<dyn paseo_provider::AgentClient>));
        map
    }

    async fn manager() -> (Arc<AgentManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let manager = AgentManager::new(dir.path().join("agents.json"), factories(), Arc::new(NoopWorktreeProvisioner)).unwrap();
        (manager, dir)
    }

    async fn wait_until(handle: &AgentHandle, status: AgentStatus) {
        for _ in 0..200 {
            if handle.snapshot().await.map(|s| s.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("timed out waiting for status {status:?}");
    }

    async fn wait_for_permission_request(handle: &AgentHandle) -> String {
        for _ in 0..200 {
            let entries = handle.timeline_range(Direction::Forward, usize::MAX, None).await;
            for entry in entries {
                if let TimelineVariant::PermissionRequest { id, .. } = entry.variant {
                    return id;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("timed out waiting for a permission_request");
    }

    /// Scenario 2: a denied write under the default (read-only) mode never
    /// touches the filesystem and the turn still resolves to idle, with the
    /// denial recorded on the timeline.
    #[tokio::test]
    async fn permission_deny_blocks_execution() {
        let (manager, dir) = manager().await;
        let snapshot = manager
            .create(CreateAgentConfig {
                provider: "mock".to_string(),
                cwd: dir.path().to_path_buf(),
                title: None,
                mode_id: None,
                git: GitOptions::default(),
            })
            .await
            .unwrap();
        let handle = manager.handle(&snapshot.id).await.unwrap();

        handle.submit(None, None, "printf \"ok\" > permission.txt".to_string(), vec![]).await;
        let request_id = wait_for_permission_request(&handle).await;
        handle
            .respond_permission(request_id, PermissionDecision::Deny { message: Some("no".to_string()) })
            .await;
        wait_until(&handle, AgentStatus::Idle).await;

        assert!(!dir.path().join("permission.txt").exists());
        let entries = handle.timeline_range(Direction::Forward, usize::MAX, None).await;
        assert!(entries.iter().any(
            |e| matches!(&e.variant, TimelineVariant::PermissionResolved { behavior, .. } if behavior == "deny")
        ));
    }

    /// Scenario 4: cancelling a running turn interrupts the sleeping command
    /// before it writes its file, and the agent returns to idle.
    #[tokio::test]
    async fn cancel_stops_side_effects() {
        let (manager, dir) = manager().await;
        let snapshot = manager
            .create(CreateAgentConfig {
                provider: "mock".to_string(),
                cwd: dir.path().to_path_buf(),
                title: None,
                mode_id: Some("full-access".to_string()),
                git: GitOptions::default(),
            })
            .await
            .unwrap();
        let handle = manager.handle(&snapshot.id).await.unwrap();

        handle.submit(None, None, "sleep 5 && echo done > f.txt".to_string(), vec![]).await;
        wait_until(&handle, AgentStatus::Running).await;
        handle.cancel().await;
        wait_until(&handle, AgentStatus::Idle).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!dir.path().join("f.txt").exists());
    }

    /// Scenario 5: queuing A then B and then "send now"-ing B reorders B
    /// ahead of A, so the turn right after the in-flight one drains B and the
    /// one after that drains A — never the other way around.
    #[tokio::test]
    async fn queued_send_now_reorders_ahead_of_fifo() {
        let (manager, dir) = manager().await;
        let snapshot = manager
            .create(CreateAgentConfig {
                provider: "mock".to_string(),
                cwd: dir.path().to_path_buf(),
                title: None,
                mode_id: Some("full-access".to_string()),
                git: GitOptions::default(),
            })
            .await
            .unwrap();
        let handle = manager.handle(&snapshot.id).await.unwrap();

        handle.submit(None, None, "sleep 1 && echo done > first.txt".to_string(), vec![]).await;
        wait_until(&handle, AgentStatus::Running).await;

        handle.submit(None, Some("a".to_string()), "A".to_string(), vec![]).await;
        handle.submit(None, Some("b".to_string()), "B".to_string(), vec![]).await;
        handle.send_now(None, Some("b".to_string()), "B".to_string(), vec![]).await;

        // Drains: the in-flight turn, then B (reordered to the front), then A.
        wait_until(&handle, AgentStatus::Idle).await;

        let user_messages: Vec<String> = handle
            .timeline_range(Direction::Forward, usize::MAX, None)
            .await
            .into_iter()
            .filter_map(|e| match e.variant {
                TimelineVariant::UserMessage { text } => Some(text),
                _ => None,
            })
            .collect();

        assert_eq!(
            user_messages,
            vec!["sleep 1 && echo done > first.txt".to_string(), "B".to_string(), "A".to_string()]
        );
    }
}
