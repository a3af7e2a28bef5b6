use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use paseo_provider::{
    AgentClient, ApprovalPolicy, ModeDescriptor, PermissionDecision, ProviderEvent, Usage,
};

use crate::timeline::{Timeline, TimelineVariant, ToolCallStatus};

/// A provider handle shared between the turn-driving loop and the Agent's
/// mailbox handler for `cancel()` — the stream returned by `submit_turn` is
/// self-contained, so the lock is only held for the instant of each method
/// call, never across an await on the stream itself.
pub type SharedClient = Arc<Mutex<Box<dyn AgentClient>>>;

/// The timeline, shared the same way: `drive` locks it only for the instant
/// of each append so a concurrent `fetch_agent_timeline_request` can read it
/// while a turn is mid-flight.
pub type SharedTimeline = Arc<Mutex<Timeline>>;

/// The live Turn's pending-permission map, shared between `drive`'s gate
/// logic and the Agent mailbox's `respondPermission`/`cancel` handling
/// (§4.1 "Permission-gating ownership", resolved in DESIGN.md: the Agent's
/// Turn pipeline owns this, not an outer hub).
pub type PendingGates = Arc<Mutex<HashMap<String, oneshot::Sender<PermissionDecision>>>>;

pub fn new_pending_gates() -> PendingGates {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Resolve a pending gate. Idempotent no-op (Open Question 1) when `id` is
/// not pending — the caller distinguishes "never existed" from
/// "already resolved" only by logging a warning, never an error, since by
/// the time the decision arrives the turn may have already moved on.
pub async fn resolve_pending(pending: &PendingGates, id: &str, decision: PermissionDecision) -> bool {
    match pending.lock().await.remove(id) {
        Some(tx) => {
            let _ = tx.send(decision);
            true
        }
        None => false,
    }
}

/// Fire every still-pending gate with `Cancelled` so a blocked provider
/// awaiting a decision can unwind (§3 invariant 3).
pub async fn cancel_all_pending(pending: &PendingGates) {
    for (_, tx) in pending.lock().await.drain() {
        let _ = tx.send(PermissionDecision::Cancelled);
    }
}

/// One queued user turn, not yet started (§3 "Turn", §4.1 queue-draining).
#[derive(Debug, Clone)]
pub struct QueuedInput {
    pub request_id: Option<String>,
    pub message_id: Option<String>,
    pub text: String,
    pub images: Vec<String>,
}

/// The Agent's pending-input queue. Default draining is FIFO; `send_now`
/// implements the "send now" tie-break from §4.1: explicit replace wins
/// over FIFO, reordering a queued (or brand-new) input to the front.
#[derive(Debug, Default)]
pub struct TurnQueue {
    items: VecDeque<QueuedInput>,
}

impl TurnQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, item: QueuedInput) {
        self.items.push_back(item);
    }

    pub fn pop_front(&mut self) -> Option<QueuedInput> {
        self.items.pop_front()
    }

    pub fn front(&self) -> Option<&QueuedInput> {
        self.items.front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Move `item` to the front of the queue. If an item sharing its
    /// `message_id` is already queued, it is removed first so the resend
    /// doesn't leave a stale duplicate behind.
    pub fn send_now(&mut self, item: QueuedInput) {
        if let Some(mid) = &item.message_id {
            self.items.retain(|i| i.message_id.as_deref() != Some(mid.as_str()));
        }
        self.items.push_front(item);
    }
}

/// Metadata for a live Turn. Plain (no interior sharing needed): set once at
/// creation and read-only for the rest of its life. The actual shared,
/// concurrently-mutated state is the `PendingGates` map driven alongside it.
#[derive(Debug, Clone)]
pub struct Turn {
    pub turn_id: String,
    pub request_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(request_id: Option<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4().to_string(),
            request_id,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Completed { usage: Option<Usage> },
    Errored { message: String },
}

fn decision_label(decision: &PermissionDecision) -> String {
    match decision {
        PermissionDecision::Allow => "allow",
        PermissionDecision::Deny { .. } => "deny",
        PermissionDecision::Cancelled => "cancelled",
    }
    .to_string()
}

/// Gate a single tool-call/permission-probe id against `mode`: auto-resolve
/// immediately for `Auto`/`Deny`, or materialize a `permission_request` and
/// block on the user's decision for `Ask` (§4.1 "Turn pipeline").
async fn gate(
    client: &SharedClient,
    timeline: &SharedTimeline,
    pending: &PendingGates,
    mode: &ModeDescriptor,
    id: String,
    kind: paseo_provider::PermissionKind,
    title: String,
    input: serde_json::Value,
) {
    match mode.policy_for(kind) {
        ApprovalPolicy::Auto => {
            let _ = client.lock().await.respond_permission(&id, PermissionDecision::Allow).await;
        }
        ApprovalPolicy::Deny => {
            let _ = client
                .lock()
                .await
                .respond_permission(
                    &id,
                    PermissionDecision::Deny {
                        message: Some("denied by mode policy".to_string()),
                    },
                )
                .await;
        }
        ApprovalPolicy::Ask => {
            timeline.lock().await.append(TimelineVariant::PermissionRequest {
                id: id.clone(),
                kind,
                title,
                input,
            });
            let rx = {
                let (tx, rx) = oneshot::channel();
                pending.lock().await.insert(id.clone(), tx);
                rx
            };
            let decision = rx.await.unwrap_or(PermissionDecision::Cancelled);
            timeline.lock().await.append(TimelineVariant::PermissionResolved {
                id: id.clone(),
                behavior: decision_label(&decision),
                message: match &decision {
                    PermissionDecision::Deny { message } => message.clone(),
                    _ => None,
                },
            });
            let _ = client.lock().await.respond_permission(&id, decision).await;
        }
    }
}

/// Drive one Turn to completion: forward the input to the provider,
/// translate every event into a timeline append, gate tool calls per the
/// current mode, and return once the provider signals `TurnEnd` (or the
/// stream ends/errors).
pub async fn drive(
    client: &SharedClient,
    timeline: &SharedTimeline,
    pending: &PendingGates,
    mode: &ModeDescriptor,
    turn: &Turn,
    input: String,
    images: Vec<String>,
) -> TurnOutcome {
    timeline.lock().await.append(TimelineVariant::TurnStarted {
        turn_id: turn.turn_id.clone(),
    });
    timeline.lock().await.append(TimelineVariant::UserMessage { text: input.clone() });

    let mut stream = {
        let mut guard = client.lock().await;
        guard.submit_turn(input, images)
    };
    let mut last_usage = None;

    loop {
        let next = stream.next().await;
        match next {
            None => break,
            Some(Err(e)) => {
                let message = e.to_string();
                timeline.lock().await.append(TimelineVariant::Error {
                    message: message.clone(),
                });
                return TurnOutcome::Errored { message };
            }
            Some(Ok(event)) => match event {
                ProviderEvent::AssistantChunk { text } | ProviderEvent::AssistantMessage { text } => {
                    timeline.lock().await.append(TimelineVariant::AssistantMessage { text });
                }
                ProviderEvent::AssistantReasoning { text } => {
                    timeline.lock().await.append(TimelineVariant::AssistantReasoning { text });
                }
                ProviderEvent::ToolCall { call_id, name, input, kind } => {
                    timeline.lock().await.append(TimelineVariant::ToolCall {
                        call_id: call_id.clone(),
                        name: name.clone(),
                        status: ToolCallStatus::Running,
                        input: input.clone(),
                        output: None,
                        kind,
                    });
                    gate(client, timeline, pending, mode, call_id, kind, format!("Run {name}"), input).await;
                }
                ProviderEvent::ToolResult { call_id, output, is_error } => {
                    let status = if is_error { ToolCallStatus::Errored } else { ToolCallStatus::Completed };
                    timeline.lock().await.update_tool_call(&call_id, status, Some(output));
                }
                ProviderEvent::PermissionProbe { id, kind, title, input } => {
                    gate(client, timeline, pending, mode, id, kind, title, input).await;
                }
                ProviderEvent::Usage(usage) => last_usage = Some(usage),
                ProviderEvent::TurnEnd => break,
                ProviderEvent::Error { message } => {
                    timeline.lock().await.append(TimelineVariant::Error {
                        message: message.clone(),
                    });
                    return TurnOutcome::Errored { message };
                }
            },
        }
    }

    timeline.lock().await.append(TimelineVariant::TurnCompleted {
        turn_id: turn.turn_id.clone(),
        usage: last_usage.clone(),
    });
    TurnOutcome::Completed { usage: last_usage }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_for_two_plain_submits() {
        let mut q = TurnQueue::new();
        q.push_back(QueuedInput { request_id: None, message_id: Some("a".into()), text: "A".into(), images: vec![] });
        q.push_back(QueuedInput { request_id: None, message_id: Some("b".into()), text: "B".into(), images: vec![] });
        assert_eq!(q.pop_front().unwrap().text, "A");
        assert_eq!(q.pop_front().unwrap().text, "B");
    }

    #[test]
    fn send_now_promotes_a_queued_item_to_the_front() {
        let mut q = TurnQueue::new();
        q.push_back(QueuedInput { request_id: None, message_id: Some("a".into()), text: "A".into(), images: vec![] });
        q.push_back(QueuedInput { request_id: None, message_id: Some("b".into()), text: "B".into(), images: vec![] });
        q.send_now(QueuedInput { request_id: None, message_id: Some("b".into()), text: "B".into(), images: vec![] });
        assert_eq!(q.pop_front().unwrap().text, "B");
        assert_eq!(q.pop_front().unwrap().text, "A");
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn resolve_unknown_id_returns_false() {
        let pending = new_pending_gates();
        assert!(!resolve_pending(&pending, "missing", PermissionDecision::Allow).await);
    }

    #[tokio::test]
    async fn resolve_known_id_returns_true_and_consumes_it() {
        let pending = new_pending_gates();
        let (tx, _rx) = oneshot::channel();
        pending.lock().await.insert("p1".to_string(), tx);
        assert!(resolve_pending(&pending, "p1", PermissionDecision::Allow).await);
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_pending_clears_the_map() {
        let pending = new_pending_gates();
        let (tx, _rx) = oneshot::channel();
        pending.lock().await.insert("p1".to_string(), tx);
        cancel_all_pending(&pending).await;
        assert!(pending.lock().await.is_empty());
    }
}
