//! The Agent Manager (§4.2): owns the registry, enforces id uniqueness,
//! routes commands by id, and announces lifecycle events.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use paseo_provider::{AgentClient, PersistenceBlob};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::warn;

use crate::agent::{self, Announce, AgentHandle, AgentSnapshot};
use crate::error::CoreError;
use crate::events::ManagerEvent;

/// Builds a fresh, not-yet-handshaken provider client for a given provider
/// name. The manager is provider-agnostic; concrete factories (one per
/// supported provider, e.g. `claude-code`, `mock`) are registered by the
/// daemon at startup.
pub type ClientFactory = Arc<dyn Fn() -> Box<dyn AgentClient> + Send + Sync>;

/// External collaborator for `git.createWorktree` (§4.2 "Creation contract").
/// Left as a trait so tests and a bare CLI run can supply a no-op while a
/// real daemon wires a git-backed implementation; this keeps `paseo-core`
/// free of a hard dependency on a git binary.
#[async_trait]
pub trait WorktreeProvisioner: Send + Sync {
    /// Materialize a worktree for `cwd`, returning the path turns should
    /// actually run in.
    async fn create_worktree(&self, cwd: &Path) -> anyhow::Result<PathBuf>;

    /// Run the user-supplied post-creation setup script, returning its
    /// captured output for the synthetic `paseo_worktree_setup` tool call.
    async fn run_setup(&self, worktree: &Path) -> anyhow::Result<String>;
}

/// Default provisioner for when `git.createWorktree` is not requested, or no
/// real provisioner is configured: the worktree is just `cwd` itself.
pub struct NoopWorktreeProvisioner;

#[async_trait]
impl WorktreeProvisioner for NoopWorktreeProvisioner {
    async fn create_worktree(&self, cwd: &Path) -> anyhow::Result<PathBuf> {
        Ok(cwd.to_path_buf())
    }

    async fn run_setup(&self, _worktree: &Path) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

/// Worktree materialization request attached to `create()` (§4.2).
#[derive(Debug, Clone, Default)]
pub struct GitOptions {
    pub create_worktree: bool,
}

/// Everything needed to bring a brand-new Agent into existence.
pub struct CreateAgentConfig {
    pub provider: String,
    pub cwd: PathBuf,
    pub title: Option<String>,
    pub mode_id: Option<String>,
    pub git: GitOptions,
}

struct LiveAgent {
    handle: AgentHandle,
    provider: String,
    cwd: PathBuf,
}

/// Owns the live Agent actors, the dormant (not-yet-initialized) records
/// loaded from disk at boot, and the channels that keep `agents.json` and
/// subscribers in sync with every agent's lifecycle.
pub struct AgentManager {
    live: Mutex<HashMap<String, LiveAgent>>,
    dormant: Mutex<HashMap<String, paseo_store::AgentRecord>>,
    factories: HashMap<String, ClientFactory>,
    provisioner: Arc<dyn WorktreeProvisioner>,
    events: broadcast::Sender<ManagerEvent>,
    persist_tx: mpsc::UnboundedSender<paseo_store::AgentRecord>,
    remove_tx: mpsc::UnboundedSender<String>,
}

impl AgentManager {
    /// Load `registry_path` (an empty registry if it doesn't exist yet) and
    /// spin up the background task that keeps it in sync with every
    /// `turn_completed`/`delete`. Loaded entries start **dormant**: no
    /// provider handshake happens until `initialize()` is called for them,
    /// matching a cold daemon restart where no turn should auto-resume.
    pub fn new(
        registry_path: PathBuf,
        factories: HashMap<String, ClientFactory>,
        provisioner: Arc<dyn WorktreeProvisioner>,
    ) -> Result<Arc<Self>, CoreError> {
        let registry = paseo_store::Registry::load(&registry_path)?;
        let (events, _) = broadcast::channel(256);
        let (persist_tx, mut persist_rx) = mpsc::unbounded_channel::<paseo_store::AgentRecord>();
        let (remove_tx, mut remove_rx) = mpsc::unbounded_channel::<String>();

        let manager = Arc::new(Self {
            live: Mutex::new(HashMap::new()),
            dormant: Mutex::new(registry.agents.clone()),
            factories,
            provisioner,
            events,
            persist_tx,
            remove_tx,
        });

        let path_for_writer = registry_path.clone();
        tokio::spawn(async move {
            let mut registry = registry;
            loop {
                tokio::select! {
                    Some(record) = persist_rx.recv() => {
                        registry.upsert(record);
                        if let Err(e) = registry.save(&path_for_writer) {
                            warn!(error = %e, "failed to persist agent registry");
                        }
                    }
                    Some(id) = remove_rx.recv() => {
                        registry.remove(&id);
                        if let Err(e) = registry.save(&path_for_writer) {
                            warn!(error = %e, "failed to persist agent registry");
                        }
                    }
                    else => break,
                }
            }
        });

        Ok(manager)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    fn announce(&self) -> Announce {
        Announce {
            events: self.events.clone(),
            persist: self.persist_tx.clone(),
        }
    }

    fn client_for(&self, provider: &str) -> Result<Box<dyn AgentClient>, CoreError> {
        let factory = self
            .factories
            .get(provider)
            .ok_or_else(|| CoreError::UnknownAgent(format!("no provider registered: {provider}")))?;
        Ok(factory())
    }

    /// §4.2 "Creation contract": validate `cwd`, optionally materialize a
    /// worktree, handshake a fresh provider client, and spawn the actor.
    pub async fn create(&self, config: CreateAgentConfig) -> Result<AgentSnapshot, CoreError> {
        if !config.cwd.exists() {
            return Err(CoreError::InvalidCwd(config.cwd.display().to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let mut client = self.client_for(&config.provider)?;

        let run_cwd = if config.git.create_worktree {
            self.provisioner
                .create_worktree(&config.cwd)
                .await
                .map_err(CoreError::Other)?
        } else {
            config.cwd.clone()
        };

        let handshake = client
            .handshake(&run_cwd, None, config.mode_id.as_deref())
            .await
            .map_err(|e| CoreError::HandshakeFailed(e.to_string()))?;

        let handle = agent::spawn(
            id.clone(),
            config.provider.clone(),
            run_cwd.clone(),
            config.title.clone(),
            handshake.capabilities,
            config.mode_id.clone(),
            client,
            self.announce(),
        );

        let snapshot = handle.snapshot().await.ok_or_else(|| CoreError::UnknownAgent(id.clone()))?;

        self.live.lock().await.insert(
            id.clone(),
            LiveAgent { handle: handle.clone(), provider: config.provider.clone(), cwd: run_cwd.clone() },
        );

        if config.git.create_worktree {
            let provisioner = self.provisioner.clone();
            let handle_for_setup = handle;
            let worktree = run_cwd;
            tokio::spawn(async move {
                handle_for_setup.note_worktree_setup_started().await;
                match provisioner.run_setup(&worktree).await {
                    Ok(output) => handle_for_setup.note_worktree_setup_finished(output, false).await,
                    Err(e) => handle_for_setup.note_worktree_setup_finished(e.to_string(), true).await,
                }
            });
        }

        Ok(snapshot)
    }

    /// Resume an Agent from an externally-supplied persistence handle,
    /// independent of whatever is currently in the on-disk registry (§4.2
    /// `resume(handle, overrides?)`).
    pub async fn resume(
        &self,
        id: String,
        provider: String,
        cwd: PathBuf,
        title: Option<String>,
        mode_id: Option<String>,
        persistence: PersistenceBlob,
    ) -> Result<AgentSnapshot, CoreError> {
        if !cwd.exists() {
            return Err(CoreError::InvalidCwd(cwd.display().to_string()));
        }
        let mut client = self.client_for(&provider)?;
        let handshake = client
            .handshake(&cwd, Some(persistence), mode_id.as_deref())
            .await
            .map_err(|e| CoreError::HandshakeFailed(e.to_string()))?;

        let handle = agent::spawn(
            id.clone(),
            provider.clone(),
            cwd.clone(),
            title,
            handshake.capabilities,
            mode_id,
            client,
            self.announce(),
        );
        let snapshot = handle.snapshot().await.ok_or_else(|| CoreError::UnknownAgent(id.clone()))?;

        self.live.lock().await.insert(id.clone(), LiveAgent { handle, provider, cwd });
        self.dormant.lock().await.remove(&id);
        Ok(snapshot)
    }

    /// Bring a dormant (loaded-but-not-yet-live) agent up by handshaking its
    /// stored persistence blob (§4.2 `initialize(id)`).
    pub async fn initialize(&self, id: &str) -> Result<AgentSnapshot, CoreError> {
        if self.live.lock().await.contains_key(id) {
            return self.get(id).await.ok_or_else(|| CoreError::UnknownAgent(id.to_string()));
        }
        let record = self
            .dormant
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownAgent(id.to_string()))?;

        self.resume(
            record.id,
            record.provider,
            record.cwd,
            record.title,
            record.mode_id,
            record.persistence,
        )
        .await
    }

    /// Force a live agent to re-handshake with its provider, refreshing its
    /// advertised capabilities/modes (§4.2 `refresh(id)`). Refused while a
    /// Turn is in flight.
    pub async fn refresh(&self, id: &str) -> Result<AgentSnapshot, CoreError> {
        let (provider, cwd) = {
            let live = self.live.lock().await;
            let entry = live.get(id).ok_or_else(|| CoreError::UnknownAgent(id.to_string()))?;
            (entry.provider.clone(), entry.cwd.clone())
        };
        let snapshot = self.get(id).await.ok_or_else(|| CoreError::UnknownAgent(id.to_string()))?;
        if snapshot.status == crate::agent::AgentStatus::Running
            || snapshot.status == crate::agent::AgentStatus::Cancelling
        {
            return Err(CoreError::Busy);
        }

        let persistence = {
            let live = self.live.lock().await;
            let entry = live.get(id).ok_or_else(|| CoreError::UnknownAgent(id.to_string()))?;
            entry.handle.shutdown().await.map_err(CoreError::Other)?
        };
        self.live.lock().await.remove(id);

        self.resume(id.to_string(), provider, cwd, snapshot.title, snapshot.current_mode_id, persistence)
            .await
    }

    /// Cancel any live Turn, ask the provider to shut down, drop the entry,
    /// and delete its persisted record (§4.2 "Delete").
    pub async fn delete(&self, id: &str) -> Result<(), CoreError> {
        if let Some(entry) = self.live.lock().await.remove(id) {
            entry.handle.cancel().await;
            let _ = entry.handle.shutdown().await;
        }
        self.dormant.lock().await.remove(id);
        let _ = self.remove_tx.send(id.to_string());
        let _ = self.events.send(ManagerEvent::Delete(id.to_string()));
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<AgentSnapshot> {
        let handle = { self.live.lock().await.get(id).map(|e| e.handle.clone()) }?;
        handle.snapshot().await
    }

    pub async fn list(&self) -> Vec<AgentSnapshot> {
        let handles: Vec<AgentHandle> = self.live.lock().await.values().map(|e| e.handle.clone()).collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(snapshot) = handle.snapshot().await {
                out.push(snapshot);
            }
        }
        out
    }

    pub async fn handle(&self, id: &str) -> Option<AgentHandle> {
        self.live.lock().await.get(id).map(|e| e.handle.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paseo_provider::mock::MockAgentClient;

    fn factories() -> HashMap<String, ClientFactory> {
        let mut map: HashMap<String, ClientFactory> = HashMap::new();
        map.insert("mock".to_string(), Arc::new(|| Box::new(MockAgentClient::new()) as Box<dyn AgentClient>));
        map
    }

    #[tokio::test]
    async fn create_rejects_a_missing_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let manager = AgentManager::new(
            dir.path().join("agents.json"),
            factories(),
            Arc::new(NoopWorktreeProvisioner),
        )
        .unwrap();

        let err = manager
            .create(CreateAgentConfig {
                provider: "mock".to_string(),
                cwd: dir.path().join("does-not-exist"),
                title: None,
                mode_id: None,
                git: GitOptions::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCwd(_)));
    }

    #[tokio::test]
    async fn create_then_list_then_delete_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = AgentManager::new(
            dir.path().join("agents.json"),
            factories(),
            Arc::new(NoopWorktreeProvisioner),
        )
        .unwrap();

        let snapshot = manager
            .create(CreateAgentConfig {
                provider: "mock".to_string(),
                cwd: dir.path().to_path_buf(),
                title: Some("t".to_string()),
                mode_id: None,
                git: GitOptions::default(),
            })
            .await
            .unwrap();

        assert_eq!(manager.list().await.len(), 1);
        assert!(manager.get(&snapshot.id).await.is_some());

        manager.delete(&snapshot.id).await.unwrap();
        assert!(manager.get(&snapshot.id).await.is_none());
        assert_eq!(manager.list().await.len(), 0);
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = AgentManager::new(
            dir.path().join("agents.json"),
            factories(),
            Arc::new(NoopWorktreeProvisioner),
        )
        .unwrap();

        let err = manager
            .create(CreateAgentConfig {
                provider: "nonexistent".to_string(),
                cwd: dir.path().to_path_buf(),
                title: None,
                mode_id: None,
                git: GitOptions::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownAgent(_)));
    }
}
