//! ark-daemon: the local process between the `ark` CLI and the registry.
//!
//! - `registry`: typed HTTP client (credentials, users, invites)
//! - `session`: the logged-in token and identity
//! - `profile`: concurrent multi-field profile updates
//! - `handler`: maps IPC requests onto registry calls
//! - `config`: flag / environment / default resolution for `arkd`

pub mod config;
pub mod handler;
pub mod profile;
pub mod registry;
pub mod session;
