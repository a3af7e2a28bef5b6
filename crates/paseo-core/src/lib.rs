// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Agent/Timeline/Turn state machine and the Agent Manager (§3, §4.1, §4.2).
//!
//! This crate owns everything a Session hub needs to drive an Agent without
//! knowing anything about transports, wire framing, or relays: the append-
//! only Timeline, the Turn pipeline that consumes a provider's event stream,
//! the Agent actor (a mailbox-driven state machine), and the Manager that
//! creates/resumes/deletes Agents and keeps `agents.json` in sync.

mod agent;
mod error;
mod events;
mod manager;
mod timeline;
mod turn;

pub use agent::{AgentHandle, AgentSnapshot, AgentStatus, Announce};
pub use error::{CoreError, ErrorKind};
pub use events::ManagerEvent;
pub use manager::{
    AgentManager, ClientFactory, CreateAgentConfig, GitOptions, NoopWorktreeProvisioner,
    WorktreeProvisioner,
};
pub use timeline::{Direction, Timeline, TimelineEntry, TimelineVariant, ToolCallStatus};
pub use turn::{QueuedInput, Turn, TurnOutcome, TurnQueue};

/// Re-spawn an Agent actor directly, bypassing the Manager. Exposed mainly
/// for tests and for a future CLI path that wants to drive a single Agent
/// without a registry; production callers should go through
/// [`AgentManager`].
pub fn spawn_agent(
    id: String,
    provider: String,
    cwd: std::path::PathBuf,
    title: Option<String>,
    capabilities: paseo_provider::Capabilities,
    current_mode_id: Option<String>,
    client: Box<dyn paseo_provider::AgentClient>,
    announce: Announce,
) -> AgentHandle {
    agent::spawn(id, provider, cwd, title, capabilities, current_mode_id, client, announce)
}
