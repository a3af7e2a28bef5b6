use thiserror::Error;

/// Error taxonomy kinds named in the error-handling design: a pure
/// classification independent of the concrete variant, exercised by
/// `CoreError::taxonomy_kind` tests so the mapping never drifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputValidation,
    ProviderTransient,
    ProviderFatal,
    ConcurrencyViolation,
    Persistence,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("working directory does not exist: {0}")]
    InvalidCwd(String),
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("unknown permission: {0}")]
    UnknownPermission(String),
    #[error("mode not available: {0}")]
    UnsupportedMode(String),
    #[error("agent is already running a turn")]
    Busy,
    #[error("provider handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error(transparent)]
    Store(#[from] paseo_store::StoreError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    pub fn taxonomy_kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidCwd(_)
            | CoreError::UnknownAgent(_)
            | CoreError::UnknownPermission(_)
            | CoreError::UnsupportedMode(_) => ErrorKind::InputValidation,
            CoreError::Busy => ErrorKind::ConcurrencyViolation,
            CoreError::HandshakeFailed(_) => ErrorKind::ProviderFatal,
            CoreError::ProviderError(_) => ErrorKind::ProviderTransient,
            CoreError::Store(_) => ErrorKind::Persistence,
            CoreError::Other(_) => ErrorKind::ProviderTransient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_input_validation() {
        assert_eq!(
            CoreError::InvalidCwd("x".into()).taxonomy_kind(),
            ErrorKind::InputValidation
        );
        assert_eq!(
            CoreError::UnknownAgent("x".into()).taxonomy_kind(),
            ErrorKind::InputValidation
        );
        assert_eq!(
            CoreError::UnknownPermission("x".into()).taxonomy_kind(),
            ErrorKind::InputValidation
        );
        assert_eq!(
            CoreError::UnsupportedMode("x".into()).taxonomy_kind(),
            ErrorKind::InputValidation
        );
    }

    #[test]
    fn busy_is_concurrency_violation() {
        assert_eq!(CoreError::Busy.taxonomy_kind(), ErrorKind::ConcurrencyViolation);
    }

    #[test]
    fn handshake_failure_is_provider_fatal() {
        assert_eq!(
            CoreError::HandshakeFailed("x".into()).taxonomy_kind(),
            ErrorKind::ProviderFatal
        );
    }
}
