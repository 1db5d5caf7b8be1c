use ark_core::crypto::CipherError;
use ark_core::{DecodeError, EntityKind, ErrorClass, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid registry url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("not logged in")]
    NoSession,

    #[error("registry unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("registry returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("cannot decode registry response: {0}")]
    Decode(#[from] DecodeError),

    #[error("registry returned an invalid record: {0}")]
    Validation(#[from] ValidationError),

    #[error("expected a {expected:?} record, got {found:?}")]
    UnexpectedEntity {
        expected: EntityKind,
        found: EntityKind,
    },

    #[error("cannot encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("credential cipher: {0}")]
    Cipher(#[from] CipherError),

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::Decode(DecodeError::Malformed(e))
    }
}

impl RegistryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RegistryError::Transport(_)
            | RegistryError::Cancelled
            | RegistryError::DeadlineExceeded => ErrorClass::Transport,
            RegistryError::Status { .. }
            | RegistryError::Decode(_)
            | RegistryError::UnexpectedEntity { .. } => ErrorClass::Protocol,
            RegistryError::Validation(_) | RegistryError::Cipher(_) => ErrorClass::Validation,
            RegistryError::NoSession => ErrorClass::Precondition,
            RegistryError::InvalidUrl { .. } | RegistryError::Encode(_) => ErrorClass::Internal,
        }
    }

    /// Worth retrying with the same request id.
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Transport(_) | RegistryError::DeadlineExceeded => true,
            RegistryError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert_eq!(RegistryError::NoSession.class(), ErrorClass::Precondition);
        assert_eq!(RegistryError::Cancelled.class(), ErrorClass::Transport);
        assert_eq!(
            RegistryError::Validation(ValidationError::MissingMaster).class(),
            ErrorClass::Validation
        );
        assert_eq!(
            RegistryError::Decode(DecodeError::UnsupportedVersion(9)).class(),
            ErrorClass::Protocol
        );
    }

    #[test]
    fn only_server_side_statuses_retry() {
        let err = |status| RegistryError::Status {
            status,
            message: String::new(),
        };
        assert!(err(503).is_retryable());
        assert!(!err(404).is_retryable());
        assert!(!RegistryError::Cancelled.is_retryable());
    }
}
