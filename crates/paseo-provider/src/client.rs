use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mode::{ModeDescriptor, PermissionKind};

/// An opaque, provider-defined blob sufficient to resume a conversation
/// (§ GLOSSARY "Persistence handle"). The core never inspects its contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceBlob(pub Value);

/// What a provider declares about itself after a successful handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub modes: Vec<ModeDescriptor>,
    pub supports_images: bool,
}

#[derive(Debug, Clone)]
pub struct HandshakeResult {
    pub capabilities: Capabilities,
    /// Present when resuming; absent on a brand-new handshake.
    pub persistence: Option<PersistenceBlob>,
}

/// The decision delivered by `agent_permission_response` (§6), forwarded
/// verbatim into the provider adapter's `respondPermission`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum PermissionDecision {
    Allow,
    Deny { message: Option<String> },
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One item of the async event stream a provider emits while driving a Turn
/// (§6 "Provider adapter contract"). Each variant maps onto one or more
/// timeline entries by `paseo-core`'s turn pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    AssistantChunk { text: String },
    AssistantMessage { text: String },
    AssistantReasoning { text: String },
    ToolCall {
        call_id: String,
        name: String,
        input: Value,
        kind: PermissionKind,
    },
    ToolResult {
        call_id: String,
        output: String,
        is_error: bool,
    },
    /// A gated operation that does not correspond to a discrete tool call
    /// (e.g. a direct file write); gated the same way as `ToolCall`.
    PermissionProbe {
        id: String,
        kind: PermissionKind,
        title: String,
        input: Value,
    },
    Usage(Usage),
    TurnEnd,
    Error { message: String },
}

pub type ProviderEventStream =
    Pin<Box<dyn Stream<Item = anyhow::Result<ProviderEvent>> + Send>>;

/// The uniform contract the core consumes from each agent backend.
///
/// Modeled as a capability set rather than an inheritance hierarchy (§9):
/// new providers plug in by implementing this trait, no base class.
#[async_trait]
pub trait AgentClient: Send {
    async fn handshake(
        &mut self,
        cwd: &Path,
        resume: Option<PersistenceBlob>,
        mode_id: Option<&str>,
    ) -> anyhow::Result<HandshakeResult>;

    /// Start driving a turn; the returned stream is polled to completion
    /// (or cancellation) by the caller.
    fn submit_turn(&mut self, input: String, images: Vec<String>) -> ProviderEventStream;

    /// Resolve a pending `ToolCall`/`PermissionProbe` previously emitted on
    /// the turn's event stream.
    async fn respond_permission(
        &mut self,
        id: &str,
        decision: PermissionDecision,
    ) -> anyhow::Result<()>;

    /// Ask the provider to abort the in-flight turn cooperatively.
    async fn cancel(&mut self) -> anyhow::Result<()>;

    async fn shutdown(&mut self) -> anyhow::Result<()>;

    async fn export_persistence(&self) -> anyhow::Result<PersistenceBlob>;
}
