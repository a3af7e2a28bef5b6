//! The wire protocol (§6): JSON text frames, inbound wrapped in a `session`
//! envelope, outbound carrying the message directly. JSON-only — browsers
//! and mobile clients are the only callers, so there's no binary-framing
//! half to support.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use paseo_core::{AgentSnapshot, TimelineEntry};
use paseo_provider::{PermissionDecision, Usage};

/// The envelope every inbound frame arrives wrapped in.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub kind: InboundEnvelopeKind,
    pub message: InboundMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub enum InboundEnvelopeKind {
    #[serde(rename = "session")]
    Session,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitOptionsWire {
    #[serde(default)]
    pub create_worktree: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentConfigWire {
    pub provider: String,
    pub cwd: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub mode_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeAgentOverridesWire {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub mode_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeHandleWire {
    pub id: String,
    pub provider: String,
    pub cwd: String,
    pub persistence: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionResponseWire {
    pub behavior: PermissionBehaviorWire,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionBehaviorWire {
    Allow,
    Deny,
    Cancelled,
}

impl From<PermissionResponseWire> for PermissionDecision {
    fn from(value: PermissionResponseWire) -> Self {
        match value.behavior {
            PermissionBehaviorWire::Allow => PermissionDecision::Allow,
            PermissionBehaviorWire::Deny => PermissionDecision::Deny { message: value.message },
            PermissionBehaviorWire::Cancelled => PermissionDecision::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineDirectionWire {
    Forward,
    Backward,
}

impl From<TimelineDirectionWire> for paseo_core::Direction {
    fn from(value: TimelineDirectionWire) -> Self {
        match value {
            TimelineDirectionWire::Forward => paseo_core::Direction::Forward,
            TimelineDirectionWire::Backward => paseo_core::Direction::Backward,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileExplorerModeWire {
    List,
    File,
}

/// Every recognized inbound `message.type` (§6, minimum set). The `type` tag
/// is snake_case (`send_agent_message`) but every field name is camelCase
/// (`agentId`), matching the wire examples in §6 exactly.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    SubscribeAgentsRequest {
        subscription_id: String,
        #[serde(default)]
        agent_id: Option<String>,
    },
    UnsubscribeAgentsRequest {
        subscription_id: String,
    },
    CreateAgentRequest {
        config: CreateAgentConfigWire,
        #[serde(default)]
        git: GitOptionsWire,
        #[serde(default)]
        request_id: Option<String>,
    },
    ResumeAgentRequest {
        handle: ResumeHandleWire,
        #[serde(default)]
        overrides: Option<ResumeAgentOverridesWire>,
        #[serde(default)]
        request_id: Option<String>,
    },
    InitializeAgentRequest {
        agent_id: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    RefreshAgentRequest {
        agent_id: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    SendAgentMessage {
        agent_id: String,
        text: String,
        message_id: String,
        #[serde(default)]
        images: Vec<String>,
        #[serde(default)]
        send_now: bool,
    },
    CancelAgentRequest {
        agent_id: String,
    },
    DeleteAgentRequest {
        agent_id: String,
    },
    SetAgentMode {
        agent_id: String,
        mode_id: String,
    },
    AgentPermissionResponse {
        agent_id: String,
        request_id: String,
        response: PermissionResponseWire,
    },
    GitRepoInfoRequest {
        cwd: String,
        request_id: String,
    },
    GitDiffRequest {
        agent_id: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    FileExplorerRequest {
        agent_id: String,
        path: String,
        mode: FileExplorerModeWire,
        #[serde(default)]
        request_id: Option<String>,
    },
    FetchAgentTimelineRequest {
        agent_id: String,
        direction: TimelineDirectionWire,
        limit: usize,
        #[serde(default)]
        cursor: Option<u64>,
        request_id: String,
    },
}

/// One `agent_stream` event variant (§6: `event.type` ∈ {timeline,
/// turn_started, turn_completed, permission_resolved, error}). Only
/// `Timeline` currently carries real per-entry payload; the others are
/// folded out of `TimelineVariant` so a subscriber doesn't have to special
/// case the timeline's own `TurnStarted`/`TurnCompleted`/`PermissionResolved`
/// entries twice.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    Timeline { entry: TimelineEntry },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepoInfoWire {
    pub is_repo: bool,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileExplorerEntryWire {
    pub name: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FileExplorerResultWire {
    Listing { entries: Vec<FileExplorerEntryWire> },
    File { content: String },
}

/// Every outbound `M.type` (§6, minimum set). Same tag/field casing split as
/// `InboundMessage`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    SessionState {
        agents: Vec<AgentSnapshot>,
    },
    AgentUpdate {
        kind: UpdateKindWire,
        agent: AgentSnapshot,
    },
    AgentDeleted {
        agent_id: String,
    },
    AgentStream {
        agent_id: String,
        event: AgentStreamEvent,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    AgentStreamSnapshot {
        agent_id: String,
        events: Vec<TimelineEntry>,
    },
    AgentPermissionRequest {
        agent_id: String,
        request: PermissionRequestWire,
    },
    AgentPermissionResolved {
        agent_id: String,
        request_id: String,
    },
    Status {
        status: StatusWire,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    GitDiffResponse {
        request_id: Option<String>,
        diff: String,
    },
    GitRepoInfoResponse {
        request_id: String,
        info: GitRepoInfoWire,
    },
    FileExplorerResponse {
        request_id: Option<String>,
        result: FileExplorerResultWire,
    },
    FetchAgentTimelineResponse {
        request_id: String,
        entries: Vec<TimelineEntry>,
    },
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKindWire {
    Upsert,
    Delete,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusWire {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct PermissionRequestWire {
    pub id: String,
    pub kind: paseo_provider::PermissionKind,
    pub title: String,
    pub input: Value,
}

/// Serialize an outbound message to the JSON text the wire carries.
/// Outbound frames carry the message directly, no envelope (§6).
pub fn encode(message: &OutboundMessage) -> String {
    serde_json::to_string(message).expect("OutboundMessage always serializes")
}

/// Average `Usage` across entries is out of scope; this helper exists only
/// to keep `turn_completed`-shaped timeline entries and the `Usage` type
/// visibly connected for readers of this module.
#[allow(dead_code)]
fn usage_is_carried_on_turn_completed(_: &Usage) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_agent_message_parses_from_envelope() {
        let json = r#"{
            "type": "session",
            "message": {
                "type": "send_agent_message",
                "agentId": "a1",
                "text": "hello",
                "messageId": "m1"
            }
        }"#;
        let envelope: InboundEnvelope = serde_json::from_str(json).unwrap();
        match envelope.message {
            InboundMessage::SendAgentMessage { agent_id, text, message_id, images, send_now } => {
                assert_eq!(agent_id, "a1");
                assert_eq!(text, "hello");
                assert_eq!(message_id, "m1");
                assert!(images.is_empty());
                assert!(!send_now);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn permission_response_maps_deny_with_message() {
        let wire = PermissionResponseWire { behavior: PermissionBehaviorWire::Deny, message: Some("no".into()) };
        let decision: PermissionDecision = wire.into();
        assert_eq!(decision, PermissionDecision::Deny { message: Some("no".into()) });
    }

    #[test]
    fn status_message_omits_absent_optional_fields() {
        let msg = OutboundMessage::Status { status: StatusWire::Ok, request_id: None, agent_id: None, error: None };
        let json = encode(&msg);
        assert!(!json.contains("requestId"));
        assert!(!json.contains("agentId"));
        assert!(!json.contains("error"));
    }
}
