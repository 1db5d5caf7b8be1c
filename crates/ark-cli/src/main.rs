use anyhow::{anyhow, Result};
use ark_core::ipc::{IpcRequest, IpcResponse};
use ark_core::ipc_client::IpcClient;
use ark_core::paths::ipc_socket_path;
use ark_core::primitive::InviteState;
use ark_core::secure_storage::get_ipc_secret;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "ark")]
#[command(about = "Command-line front end for the Ark daemon", long_about = None)]
struct Cli {
    /// Daemon socket (default: $ARK_SOCKET_PATH, then the data directory)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the daemon is reachable
    Ping,

    /// Show daemon and session status
    Status,

    /// Log in with a registry token
    Login {
        /// Prompted for when omitted
        #[arg(long)]
        token: Option<String>,
    },

    /// Forget the current session
    Logout,

    /// Show credentials under a path
    Get { path: String },

    /// Store a credential value
    Set {
        path: String,
        name: String,
        value: String,
    },

    /// Clear a credential
    Unset { path: String, name: String },

    /// Org invitations
    #[command(subcommand)]
    Invites(InviteCommands),

    /// Change account name and/or email
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
}

#[derive(Subcommand)]
enum InviteCommands {
    /// List invites for an org
    List {
        org_id: String,
        /// Repeat to match several states
        #[arg(long = "state")]
        states: Vec<InviteState>,
    },

    /// Accept an invite code
    Accept {
        org: String,
        email: String,
        code: String,
    },

    /// Approve an accepted invite
    Approve { invite_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let request = match cli.command {
        Commands::Ping => IpcRequest::Ping,
        Commands::Status => IpcRequest::Status,
        Commands::Login { token } => {
            let token = match token {
                Some(token) => Zeroizing::new(token),
                None => Zeroizing::new(rpassword::prompt_password("Registry token: ")?),
            };
            IpcRequest::Login {
                token: token.to_string(),
            }
        }
        Commands::Logout => IpcRequest::Logout,
        Commands::Get { path } => IpcRequest::GetCredentials { path },
        Commands::Set { path, name, value } => IpcRequest::SetCredential { path, name, value },
        Commands::Unset { path, name } => IpcRequest::UnsetCredential { path, name },
        Commands::Invites(InviteCommands::List { org_id, states }) => {
            IpcRequest::ListInvites { org_id, states }
        }
        Commands::Invites(InviteCommands::Accept { org, email, code }) => {
            IpcRequest::AcceptInvite { org, email, code }
        }
        Commands::Invites(InviteCommands::Approve { invite_id }) => {
            IpcRequest::ApproveInvite { invite_id }
        }
        Commands::Profile { name, email } => {
            if name.is_none() && email.is_none() {
                return Err(anyhow!("nothing to update: pass --name and/or --email"));
            }
            IpcRequest::UpdateProfile { name, email }
        }
    };

    let socket_path = match cli.socket {
        Some(path) => path,
        None => ipc_socket_path()?,
    };
    let secret = get_ipc_secret()?;
    let mut client = IpcClient::connect(&socket_path, &secret).await?;
    let response = client.send(request).await?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    if let IpcResponse::Failed {
        class,
        message,
        retryable,
    } = response
    {
        let hint = if retryable { ", retry may succeed" } else { "" };
        return Err(anyhow!("{message} ({class:?}{hint})"));
    }
    Ok(())
}
