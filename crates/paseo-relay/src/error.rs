//! Errors the relay client can raise (§7 "Transport"): everything here is a
//! connection-scoped failure — losing a relay link never has a daemon-wide
//! effect, it just ends that one control or data connection.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay handshake failed: {0}")]
    Handshake(String),
    #[error("relay frame decrypt failed: {0}")]
    Decrypt(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
