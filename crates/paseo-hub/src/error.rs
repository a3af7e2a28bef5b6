//! Errors the transport layer itself can raise, as distinct from the
//! per-operation failures reported inline as `status{error}` frames (§7:
//! "A transport-level failure — the socket itself breaking — is distinct
//! from an operation failing; the former ends the connection, the latter is
//! just another `status` frame.").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] axum::Error),
}
