//! A deterministic in-process [`AgentClient`] used by this repository's own
//! tests to drive the turn pipeline, permission gating, and cancellation
//! without a real provider subprocess (§2 "Mock/test provider adapter").
//!
//! It understands a tiny vocabulary of inputs so the end-to-end scenarios in
//! `SPEC_FULL.md` §8 can be expressed as plain-text prompts:
//!
//! - `Remember this marker: "X"` → stores `X`, replies with an acknowledgement.
//! - `What was the marker?` → replies with the stored marker.
//! - `printf "C" > path` → emits a gated `Write` tool call; once allowed,
//!   writes `C` to `path` under the handshake `cwd`.
//! - `sleep N && echo done > path` → emits a gated `Command` tool call that
//!   sleeps `N` seconds (cancellable) before writing `path`.
//! - anything else → a plain assistant echo, no gating.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::client::{
    AgentClient, Capabilities, HandshakeResult, PermissionDecision, PersistenceBlob,
    ProviderEvent, ProviderEventStream, Usage,
};
use crate::mode::{ModeDescriptor, PermissionKind};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<PermissionDecision>>>>;

pub struct MockAgentClient {
    cwd: PathBuf,
    marker: Arc<Mutex<Option<String>>>,
    pending: PendingMap,
    cancelled: Arc<tokio::sync::Notify>,
    next_id: Arc<AtomicU64>,
}

impl Default for MockAgentClient {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            marker: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            cancelled: Arc::new(tokio::sync::Notify::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl MockAgentClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&self) -> String {
        format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

enum Action {
    Remember(String),
    Recall,
    Write { path: String, content: String },
    SleepThenWrite { secs: u64, path: String, content: String },
    Echo,
}

fn parse(input: &str) -> Action {
    let trimmed = input.trim();
    if let Some(rest) = trimmed.strip_prefix("Remember this marker:") {
        let marker = rest.trim().trim_matches('"').to_string();
        return Action::Remember(marker);
    }
    if trimmed.contains("What was the marker") {
        return Action::Recall;
    }
    if let Some(rest) = trimmed.strip_prefix("sleep ") {
        if let Some((secs_str, tail)) = rest.split_once("&&") {
            if let Ok(secs) = secs_str.trim().parse::<u64>() {
                if let Some((_, redirect)) = tail.split_once('>') {
                    return Action::SleepThenWrite {
                        secs,
                        path: redirect.trim().to_string(),
                        content: "done".to_string(),
                    };
                }
            }
        }
    }
    if trimmed.starts_with("printf") {
        if let Some((lhs, path)) = trimmed.split_once('>') {
            let content = lhs
                .trim_start_matches("printf")
                .trim()
                .trim_matches('"')
                .to_string();
            return Action::Write {
                path: path.trim().to_string(),
                content,
            };
        }
    }
    Action::Echo
}

#[async_trait]
impl AgentClient for MockAgentClient {
    async fn handshake(
        &mut self,
        cwd: &std::path::Path,
        resume: Option<PersistenceBlob>,
        _mode_id: Option<&str>,
    ) -> anyhow::Result<HandshakeResult> {
        self.cwd = cwd.to_path_buf();
        if let Some(PersistenceBlob(value)) = &resume {
            if let Some(marker) = value.get("marker").and_then(|v| v.as_str()) {
                *self.marker.lock().await = Some(marker.to_string());
            }
        }
        Ok(HandshakeResult {
            capabilities: Capabilities {
                modes: ModeDescriptor::builtin_modes(),
                supports_images: false,
            },
            persistence: resume,
        })
    }

    fn submit_turn(&mut self, input: String, _images: Vec<String>) -> ProviderEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let marker = self.marker.clone();
        let pending = self.pending.clone();
        let cancelled = self.cancelled.clone();
        let cwd = self.cwd.clone();
        let call_id = self.fresh_id();

        tokio::spawn(async move {
            let action = parse(&input);
            match action {
                Action::Remember(m) => {
                    *marker.lock().await = Some(m.clone());
                    let _ = tx.send(Ok(ProviderEvent::AssistantMessage {
                        text: format!("Remembered: {m}"),
                    }));
                }
                Action::Recall => {
                    let m = marker.lock().await.clone().unwrap_or_else(|| "nothing".into());
                    let _ = tx.send(Ok(ProviderEvent::AssistantMessage {
                        text: format!("The marker was {m}"),
                    }));
                }
                Action::Write { path, content } => {
                    let _ = tx.send(Ok(ProviderEvent::ToolCall {
                        call_id: call_id.clone(),
                        name: "write_file".to_string(),
                        input: json!({ "path": path, "content": content }),
                        kind: PermissionKind::Write,
                    }));
                    let (ptx, prx) = oneshot::channel();
                    pending.lock().await.insert(call_id.clone(), ptx);
                    match prx.await {
                        Ok(PermissionDecision::Allow) => {
                            let full = cwd.join(&path);
                            let wrote = tokio::fs::write(&full, &content).await;
                            let ok = wrote.is_ok();
                            let _ = tx.send(Ok(ProviderEvent::ToolResult {
                                call_id: call_id.clone(),
                                output: if ok {
                                    format!("wrote {} bytes to {}", content.len(), path)
                                } else {
                                    "write failed".to_string()
                                },
                                is_error: !ok,
                            }));
                        }
                        Ok(PermissionDecision::Deny { message }) => {
                            let _ = tx.send(Ok(ProviderEvent::ToolResult {
                                call_id: call_id.clone(),
                                output: message.unwrap_or_else(|| "denied by user".to_string()),
                                is_error: true,
                            }));
                        }
                        Ok(PermissionDecision::Cancelled) | Err(_) => {
                            let _ = tx.send(Ok(ProviderEvent::ToolResult {
                                call_id: call_id.clone(),
                                output: "cancelled".to_string(),
                                is_error: true,
                            }));
                        }
                    }
                }
                Action::SleepThenWrite { secs, path, content } => {
                    let _ = tx.send(Ok(ProviderEvent::ToolCall {
                        call_id: call_id.clone(),
                        name: "run_command".to_string(),
                        input: json!({ "command": format!("sleep {secs} && echo done > {path}") }),
                        kind: PermissionKind::Command,
                    }));
                    let (ptx, prx) = oneshot::channel();
                    pending.lock().await.insert(call_id.clone(), ptx);
                    let decision = prx.await;
                    match decision {
                        Ok(PermissionDecision::Allow) => {
                            tokio::select! {
                                _ = tokio::time::sleep(std::time::Duration::from_secs(secs)) => {
                                    let full = cwd.join(&path);
                                    let wrote = tokio::fs::write(&full, &content).await;
                                    let ok = wrote.is_ok();
                                    let _ = tx.send(Ok(ProviderEvent::ToolResult {
                                        call_id: call_id.clone(),
                                        output: if ok { "done".to_string() } else { "write failed".to_string() },
                                        is_error: !ok,
                                    }));
                                }
                                _ = cancelled.notified() => {
                                    let _ = tx.send(Ok(ProviderEvent::ToolResult {
                                        call_id: call_id.clone(),
                                        output: "interrupted".to_string(),
                                        is_error: true,
                                    }));
                                }
                            }
                        }
                        Ok(PermissionDecision::Deny { message }) => {
                            let _ = tx.send(Ok(ProviderEvent::ToolResult {
                                call_id: call_id.clone(),
                                output: message.unwrap_or_else(|| "denied by user".to_string()),
                                is_error: true,
                            }));
                        }
                        Ok(PermissionDecision::Cancelled) | Err(_) => {
                            let _ = tx.send(Ok(ProviderEvent::ToolResult {
                                call_id: call_id.clone(),
                                output: "cancelled".to_string(),
                                is_error: true,
                            }));
                        }
                    }
                }
                Action::Echo => {
                    let _ = tx.send(Ok(ProviderEvent::AssistantMessage {
                        text: format!("Acknowledged: {input}"),
                    }));
                }
            }
            let _ = tx.send(Ok(ProviderEvent::Usage(Usage {
                input_tokens: input.len() as u32,
                output_tokens: 8,
            })));
            let _ = tx.send(Ok(ProviderEvent::TurnEnd));
        });

        Box::pin(UnboundedReceiverStream::new(rx))
    }

    async fn respond_permission(
        &mut self,
        id: &str,
        decision: PermissionDecision,
    ) -> anyhow::Result<()> {
        if let Some(tx) = self.pending.lock().await.remove(id) {
            let _ = tx.send(decision);
        }
        Ok(())
    }

    async fn cancel(&mut self) -> anyhow::Result<()> {
        self.cancelled.notify_waiters();
        Ok(())
    }

    async fn shutdown(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn export_persistence(&self) -> anyhow::Result<PersistenceBlob> {
        let marker = self.marker.lock().await.clone();
        Ok(PersistenceBlob(json!({ "marker": marker })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    async fn drain(stream: ProviderEventStream) -> Vec<ProviderEvent> {
        stream.filter_map(|r| async move { r.ok() }).collect().await
    }

    #[tokio::test]
    async fn remember_then_recall_round_trips() {
        let mut client = MockAgentClient::new();
        let dir = tempfile::tempdir().unwrap();
        client.handshake(dir.path(), None, None).await.unwrap();

        let events = drain(client.submit_turn(
            "Remember this marker: \"MARK_123\"".to_string(),
            vec![],
        ))
        .await;
        assert!(events.iter().any(|e| matches!(e, ProviderEvent::AssistantMessage{text} if text.contains("MARK_123"))));

        let events = drain(client.submit_turn("What was the marker?".to_string(), vec![])).await;
        assert!(events.iter().any(|e| matches!(e, ProviderEvent::AssistantMessage{text} if text.contains("MARK_123"))));
    }

    #[tokio::test]
    async fn persistence_round_trips_marker_across_handshake() {
        let mut client = MockAgentClient::new();
        let dir = tempfile::tempdir().unwrap();
        client.handshake(dir.path(), None, None).await.unwrap();
        drain(client.submit_turn(
            "Remember this marker: \"MARK_456\"".to_string(),
            vec![],
        ))
        .await;
        let blob = client.export_persistence().await.unwrap();

        let mut fresh = MockAgentClient::new();
        fresh.handshake(dir.path(), Some(blob), None).await.unwrap();
        let events = drain(fresh.submit_turn("What was the marker?".to_string(), vec![])).await;
        assert!(events.iter().any(|e| matches!(e, ProviderEvent::AssistantMessage{text} if text.contains("MARK_456"))));
    }

    #[tokio::test]
    async fn write_is_gated_and_blocked_on_deny() {
        let mut client = MockAgentClient::new();
        let dir = tempfile::tempdir().unwrap();
        client.handshake(dir.path(), None, None).await.unwrap();

        let mut stream = client.submit_turn(
            "printf \"ok\" > permission.txt".to_string(),
            vec![],
        );
        let first = stream.next().await.unwrap().unwrap();
        let call_id = match first {
            ProviderEvent::ToolCall { call_id, kind, .. } => {
                assert_eq!(kind, PermissionKind::Write);
                call_id
            }
            other => panic!("expected ToolCall, got {other:?}"),
        };

        client
            .respond_permission(
                &call_id,
                PermissionDecision::Deny { message: Some("no".into()) },
            )
            .await
            .unwrap();

        let rest: Vec<_> = stream.filter_map(|r| async move { r.ok() }).collect().await;
        assert!(rest.iter().any(|e| matches!(e, ProviderEvent::ToolResult{is_error: true, ..})));
        assert!(!dir.path().join("permission.txt").exists());
    }

    #[tokio::test]
    async fn write_allowed_creates_file() {
        let mut client = MockAgentClient::new();
        let dir = tempfile::tempdir().unwrap();
        client.handshake(dir.path(), None, None).await.unwrap();

        let mut stream = client.submit_turn(
            "printf \"ok\" > allowed.txt".to_string(),
            vec![],
        );
        let first = stream.next().await.unwrap().unwrap();
        let call_id = match first {
            ProviderEvent::ToolCall { call_id, .. } => call_id,
            other => panic!("expected ToolCall, got {other:?}"),
        };
        client
            .respond_permission(&call_id, PermissionDecision::Allow)
            .await
            .unwrap();
        let _: Vec<_> = stream.filter_map(|r| async move { r.ok() }).collect().await;
        assert!(dir.path().join("allowed.txt").exists());
    }

    #[tokio::test]
    async fn cancel_interrupts_sleeping_command() {
        let mut client = MockAgentClient::new();
        let dir = tempfile::tempdir().unwrap();
        client.handshake(dir.path(), None, None).await.unwrap();

        let mut stream = client.submit_turn(
            "sleep 5 && echo done > f.txt".to_string(),
            vec![],
        );
        let first = stream.next().await.unwrap().unwrap();
        let call_id = match first {
            ProviderEvent::ToolCall { call_id, .. } => call_id,
            other => panic!("expected ToolCall, got {other:?}"),
        };
        client
            .respond_permission(&call_id, PermissionDecision::Allow)
            .await
            .unwrap();
        client.cancel().await.unwrap();

        let rest: Vec<_> = stream.filter_map(|r| async move { r.ok() }).collect().await;
        assert!(rest.iter().any(|e| matches!(e, ProviderEvent::ToolResult{is_error: true, ..})));
        assert!(!dir.path().join("f.txt").exists());
    }
}
