//! ark-core: envelope codec, local IPC plumbing and shared primitives for
//! the Ark secrets daemon and its command-line front end.
//!
//! # Modules
//! - `envelope`: versioned envelope codec (decode → validate → use)
//! - `primitive`: version-1 body schemas (credential, user, org invite)
//! - `credential`: plaintext credentials and their sealed registry form
//! - `crypto`: the cipher capability used to seal credential values
//! - `server`: the Unix-socket listener owned by the daemon
//! - `ipc`: authenticated request/response protocol over that socket
//! - `ipc_client`: the client side of the same protocol

pub mod credential;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod ipc;
#[cfg(unix)]
pub mod ipc_client;
pub mod paths;
pub mod primitive;
pub mod secure_storage;
#[cfg(unix)]
pub mod server;

pub use envelope::{decode, decode_body, encode, Body, EntityKind, Envelope, Unverified};
pub use error::{DecodeError, EnvelopeError, ErrorClass, ValidationError};
pub use identity::{Id, RequestId};
