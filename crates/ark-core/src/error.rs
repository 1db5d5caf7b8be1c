use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to turn wire bytes into a typed envelope body.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A decoded envelope that must not be used.
///
/// Each variant is a separate reason so callers can log and react to them
/// individually. None of them carry key material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("envelope version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("missing body")]
    MissingBody,

    #[error("missing master key section")]
    MissingMaster,

    #[error("unknown master key algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("zero length master key found")]
    EmptyKeyMaterial,

    #[error("required field `{0}` is empty")]
    EmptyField(&'static str),

    #[error("invite lifecycle out of order: {0}")]
    InviteOutOfOrder(&'static str),
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid envelope: {0}")]
    Validation(#[from] ValidationError),

    #[error("cannot encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Coarse failure class reported across the IPC boundary so the front end
/// can pick a message without parsing error strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Socket or HTTP failure; the caller may retry.
    Transport,
    /// Unsupported version, malformed body, unexpected status.
    Protocol,
    /// Record rejected by validation; must not be used.
    Validation,
    /// Operation attempted without its precondition (e.g. no session).
    Precondition,
    /// One or more of several concurrent updates failed.
    Aggregation,
    /// Remote state changed but the local view could not be refreshed.
    Stale,
    Internal,
}
