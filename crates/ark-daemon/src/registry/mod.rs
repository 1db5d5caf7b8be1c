//! HTTP client for the Ark registry.
//!
//! One [`RegistryClient`] owns the connection pool and base URL; the
//! `credentials()`, `users()` and `invites()` sub-clients borrow it. Every
//! call takes a [`CallContext`] carrying its deadline, cancellation token,
//! optional progress channel and, for retries, a caller-chosen request id.

mod api_client;
mod call;
mod credentials;
mod error;
mod invites;
mod users;

use std::time::Duration;

pub use api_client::{RegistryClient, REQUEST_ID_HEADER};
pub use call::{Acknowledged, CallContext, Progress, ProgressSender, ProgressStep};
pub use credentials::Credentials;
pub use error::RegistryError;
pub use invites::Invites;
pub use users::{InviteCode, Signup, Users};

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.ark.dev/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REGISTRY_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}
