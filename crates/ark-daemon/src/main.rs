use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Ark daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon in the foreground
    Run {
        /// Socket path (default: $ARK_SOCKET_PATH, then the data directory)
        #[arg(long)]
        socket: Option<PathBuf>,
        /// Registry base URL (default: $ARK_REGISTRY_URL)
        #[arg(long)]
        registry_url: Option<String>,
        /// Per-request deadline for registry calls
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            socket,
            registry_url,
            timeout_secs,
        } => run::run_command(socket, registry_url, timeout_secs).await,
    }
}

#[cfg(unix)]
mod run {
    use anyhow::{anyhow, Result};
    use ark_core::crypto::XChaChaCipher;
    use ark_core::ipc::IpcServer;
    use ark_core::secure_storage::{
        delete_ipc_secret, load_or_create_credential_key, store_ipc_secret,
    };
    use ark_daemon::config::DaemonConfig;
    use ark_daemon::handler::DaemonHandler;
    use ark_daemon::registry::RegistryClient;
    use ark_daemon::session::Session;
    use rand::rngs::OsRng;
    use rand::RngCore;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::net::UnixStream;
    use tokio::signal;
    use tracing::{info, warn};
    use zeroize::Zeroizing;

    const IPC_SECRET_LEN: usize = 32;

    pub async fn run_command(
        socket: Option<PathBuf>,
        registry_url: Option<String>,
        timeout_secs: Option<u64>,
    ) -> Result<()> {
        let config = DaemonConfig::resolve(socket, registry_url, timeout_secs)?;
        if let Some(parent) = config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // The listener replaces whatever is at the path, so refuse here if
        // a live daemon still answers on it.
        if UnixStream::connect(&config.socket_path).await.is_ok() {
            return Err(anyhow!(
                "another daemon is listening on {}",
                config.socket_path.display()
            ));
        }

        let mut secret = Zeroizing::new(vec![0u8; IPC_SECRET_LEN]);
        OsRng.fill_bytes(&mut secret[..]);

        let key = load_or_create_credential_key()?;
        let cipher = Arc::new(XChaChaCipher::new(*key));
        let registry = RegistryClient::new(&config.registry)?;
        let session = Arc::new(Session::new());
        let handler = Arc::new(DaemonHandler::new(
            registry,
            session.clone(),
            cipher,
            config.registry.timeout,
        ));

        let server = Arc::new(IpcServer::bind(secret.clone(), &config.socket_path)?);
        store_ipc_secret(&secret)?;
        info!(
            socket = %server.socket_path().display(),
            registry = %config.registry.base_url,
            "daemon started"
        );

        let server_task = tokio::spawn(server.clone().start(handler));

        signal::ctrl_c().await?;
        info!("daemon stopping");
        server.close();
        session.logout();
        match server_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "accept loop ended with error"),
            Err(e) => warn!(error = %e, "accept loop task failed"),
        }
        if let Err(e) = delete_ipc_secret() {
            warn!(error = %e, "could not remove ipc secret");
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod run {
    use anyhow::{anyhow, Result};
    use std::path::PathBuf;

    pub async fn run_command(
        _socket: Option<PathBuf>,
        _registry_url: Option<String>,
        _timeout_secs: Option<u64>,
    ) -> Result<()> {
        Err(anyhow!("arkd requires a Unix domain socket platform"))
    }
}
