// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Wire protocol, Session hub, and local WebSocket transport (§4.3, §4.4,
//! §6). This crate owns everything between an `AgentManager` and a UI
//! client: the tagged-union JSON message shapes, the per-connection
//! subscription/backpressure bookkeeping, and the axum endpoint that
//! carries it all over a local WebSocket.

mod collaborators;
mod connection;
mod error;
mod wire;
mod ws;

pub use collaborators::{explore, FileExplorer, GitInspector, LocalFileExplorer, NoopGitInspector};
pub use connection::{Connection, Hub};
pub use error::HubError;
pub use wire::{
    encode, AgentStreamEvent, CreateAgentConfigWire, FileExplorerEntryWire, FileExplorerModeWire,
    FileExplorerResultWire, GitOptionsWire, GitRepoInfoWire, InboundEnvelope, InboundMessage, OutboundMessage,
    PermissionBehaviorWire, PermissionRequestWire, PermissionResponseWire, ResumeAgentOverridesWire,
    ResumeHandleWire, StatusWire, TimelineDirectionWire, UpdateKindWire,
};
pub use ws::{handle_socket, ws_handler};
