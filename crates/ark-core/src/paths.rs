use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "dev";
pub const APP_ORG: &str = "ark";
pub const APP_NAME: &str = "ark";

pub const SOCKET_PATH_ENV: &str = "ARK_SOCKET_PATH";
const SOCKET_FILE_NAME: &str = "ark.sock";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Socket path shared by the daemon and the CLI. `ARK_SOCKET_PATH` wins over
/// the per-user data directory.
pub fn ipc_socket_path() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(SOCKET_PATH_ENV) {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    Ok(data_dir()?.join(SOCKET_FILE_NAME))
}
