use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use ark_core::paths::ipc_socket_path;

use crate::registry::{RegistryConfig, DEFAULT_REGISTRY_URL, DEFAULT_TIMEOUT};

pub const REGISTRY_URL_ENV: &str = "ARK_REGISTRY_URL";

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub registry: RegistryConfig,
}

impl DaemonConfig {
    /// Flags win over environment variables, which win over defaults.
    pub fn resolve(
        socket: Option<PathBuf>,
        registry_url: Option<String>,
        timeout_secs: Option<u64>,
    ) -> Result<Self> {
        let socket_path = match socket {
            Some(path) => path,
            None => ipc_socket_path()?,
        };
        let base_url = registry_url
            .or_else(|| std::env::var(REGISTRY_URL_ENV).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string());
        let timeout = match timeout_secs {
            Some(0) => return Err(anyhow!("--timeout-secs must be at least 1")),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };
        Ok(Self {
            socket_path,
            registry: RegistryConfig { base_url, timeout },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_everything() {
        let config = DaemonConfig::resolve(
            Some(PathBuf::from("/tmp/ark-test.sock")),
            Some("http://127.0.0.1:9/v1".to_string()),
            Some(5),
        )
        .unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/ark-test.sock"));
        assert_eq!(config.registry.base_url, "http://127.0.0.1:9/v1");
        assert_eq!(config.registry.timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(DaemonConfig::resolve(Some(PathBuf::from("/tmp/x.sock")), None, Some(0)).is_err());
    }
}
