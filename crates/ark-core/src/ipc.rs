use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::ErrorClass;
use crate::identity::RequestId;
use crate::primitive::InviteState;

pub const IPC_PROTOCOL_VERSION: u32 = 1;
pub const CLI_CLIENT_ID: &str = "ark-cli";
/// Longest frame either side will buffer, newline included.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHello {
    pub protocol_version: u32,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerChallenge {
    pub session_id: String,
    pub server_nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAuth {
    pub session_id: String,
    pub client_nonce: String,
    pub proof: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthOk {
    pub session_id: String,
}

/// One newline-terminated JSON frame on the daemon socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum IpcFrame {
    ClientHello(ClientHello),
    ServerChallenge(ServerChallenge),
    ClientAuth(ClientAuth),
    AuthOk(AuthOk),
    Error { message: String },
    Request(RequestFrame),
    Response(ResponseFrame),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub session_id: String,
    pub nonce: u64,
    pub request: IpcRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub session_id: String,
    pub nonce: u64,
    pub response: IpcResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "request", content = "data")]
pub enum IpcRequest {
    Ping,
    Status,
    Login {
        token: String,
    },
    Logout,
    GetCredentials {
        path: String,
    },
    SetCredential {
        path: String,
        name: String,
        value: String,
    },
    UnsetCredential {
        path: String,
        name: String,
    },
    ListInvites {
        org_id: String,
        states: Vec<InviteState>,
    },
    AcceptInvite {
        org: String,
        email: String,
        code: String,
    },
    ApproveInvite {
        invite_id: String,
    },
    /// `None` keeps the current value.
    UpdateProfile {
        name: Option<String>,
        email: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialView {
    pub path: String,
    pub name: String,
    /// `None` when the credential has been unset.
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteView {
    pub id: Option<String>,
    pub email: String,
    pub state: InviteState,
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Skipped,
    Applied,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "response", content = "data")]
pub enum IpcResponse {
    Pong,
    Status {
        client: u64,
        logged_in: bool,
        username: Option<String>,
    },
    LoggedIn {
        username: String,
        email: String,
    },
    LoggedOut,
    Credentials {
        credentials: Vec<CredentialView>,
    },
    CredentialStored {
        request_id: Option<RequestId>,
    },
    Invites {
        invites: Vec<InviteView>,
    },
    InviteAccepted {
        request_id: Option<RequestId>,
    },
    InviteApproved {
        request_id: Option<RequestId>,
    },
    ProfileUnchanged,
    ProfileUpdated {
        fields: Vec<(String, FieldStatus)>,
    },
    /// The request reached the handler and failed there.
    Failed {
        class: ErrorClass,
        message: String,
        /// Sending the same request again may succeed.
        #[serde(default)]
        retryable: bool,
    },
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub last_nonce: u64,
}

/// Shared-secret challenge/response plus per-session replay protection.
pub struct IpcAuthContext {
    shared_secret: Zeroizing<Vec<u8>>,
    sessions: Arc<Mutex<HashMap<String, SessionState>>>,
}

impl IpcAuthContext {
    pub fn new(shared_secret: Zeroizing<Vec<u8>>) -> Self {
        Self {
            shared_secret,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn mac(&self, server_nonce: &str, client_nonce: &str) -> Result<Hmac<Sha256>> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.shared_secret)
            .map_err(|e| anyhow!("mac init: {e}"))?;
        mac.update(server_nonce.as_bytes());
        mac.update(client_nonce.as_bytes());
        Ok(mac)
    }

    /// Constant-time check of a hex-encoded proof.
    pub fn verify_proof(&self, server_nonce: &str, client_nonce: &str, proof: &str) -> Result<()> {
        let proof = hex::decode(proof).map_err(|_| anyhow!("invalid proof"))?;
        self.mac(server_nonce, client_nonce)?
            .verify_slice(&proof)
            .map_err(|_| anyhow!("invalid proof"))
    }

    pub async fn register_session(&self, session_id: String) {
        let mut guard = self.sessions.lock().await;
        guard.insert(session_id, SessionState { last_nonce: 0 });
    }

    pub async fn drop_session(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }

    pub async fn verify_and_update_nonce(&self, session_id: &str, nonce: u64) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("unknown session"))?;
        if nonce <= session.last_nonce {
            return Err(anyhow!("replay detected: nonce not increasing"));
        }
        session.last_nonce = nonce;
        Ok(())
    }
}

pub fn compute_proof(secret: &[u8], server_nonce: &str, client_nonce: &str) -> Result<String> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).map_err(|e| anyhow!("mac init: {e}"))?;
    mac.update(server_nonce.as_bytes());
    mac.update(client_nonce.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Services authenticated requests. One call per request frame; the
/// handler maps its own failures to `IpcResponse::Failed`, an `Err` here
/// is reported to the peer as a protocol error.
#[async_trait::async_trait]
pub trait IpcHandler {
    async fn handle(&self, client: u64, req: IpcRequest) -> Result<IpcResponse>;
}

pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    writer
        .write_all(serde_json::to_string(frame)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// `Ok(None)` on a clean end of stream. A line longer than
/// `MAX_FRAME_LEN` is an error and the rest of it is left unread.
pub async fn read_frame<R, T>(reader: &mut R, line: &mut String) -> Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    line.clear();
    let n = (&mut *reader)
        .take(MAX_FRAME_LEN as u64)
        .read_line(line)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if n == MAX_FRAME_LEN && !line.ends_with('\n') {
        return Err(anyhow!("frame exceeds {MAX_FRAME_LEN} bytes"));
    }
    Ok(Some(serde_json::from_str(line.trim_end())?))
}

async fn reject<W: AsyncWrite + Unpin>(writer: &mut W, message: &str) -> anyhow::Error {
    let frame = IpcFrame::Error {
        message: message.to_string(),
    };
    if let Err(e) = write_frame(writer, &frame).await {
        debug!(error = %e, "could not deliver rejection");
    }
    anyhow!(message.to_string())
}

/// Authenticate one accepted client, then answer its requests in order
/// until it hangs up.
pub async fn handle_connection<S>(
    stream: S,
    client: u64,
    auth: Arc<IpcAuthContext>,
    handler: Arc<dyn IpcHandler + Send + Sync>,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    let hello = match read_frame::<_, IpcFrame>(&mut reader, &mut line).await? {
        Some(IpcFrame::ClientHello(h)) => h,
        Some(_) => return Err(reject(&mut writer, "expected ClientHello").await),
        None => return Err(anyhow!("empty hello")),
    };
    if hello.protocol_version != IPC_PROTOCOL_VERSION {
        return Err(reject(&mut writer, "protocol version mismatch").await);
    }
    if hello.client_id != CLI_CLIENT_ID {
        return Err(reject(&mut writer, "unauthorized client").await);
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let server_nonce = random_hex(32);
    write_frame(
        &mut writer,
        &IpcFrame::ServerChallenge(ServerChallenge {
            session_id: session_id.clone(),
            server_nonce: server_nonce.clone(),
        }),
    )
    .await?;

    let auth_msg = match read_frame::<_, IpcFrame>(&mut reader, &mut line).await? {
        Some(IpcFrame::ClientAuth(m)) => m,
        Some(_) => return Err(reject(&mut writer, "expected ClientAuth").await),
        None => return Err(anyhow!("missing client auth")),
    };
    if auth_msg.session_id != session_id {
        return Err(reject(&mut writer, "session id mismatch").await);
    }
    if auth
        .verify_proof(&server_nonce, &auth_msg.client_nonce, &auth_msg.proof)
        .is_err()
    {
        warn!(client, "ipc client failed authentication");
        return Err(reject(&mut writer, "authentication failed").await);
    }

    auth.register_session(session_id.clone()).await;
    write_frame(
        &mut writer,
        &IpcFrame::AuthOk(AuthOk {
            session_id: session_id.clone(),
        }),
    )
    .await?;
    debug!(client, "ipc client authenticated");

    let result = serve_requests(
        &mut reader,
        &mut writer,
        &mut line,
        client,
        &session_id,
        &auth,
        &handler,
    )
    .await;
    auth.drop_session(&session_id).await;
    result
}

async fn serve_requests<R, W>(
    reader: &mut R,
    writer: &mut W,
    line: &mut String,
    client: u64,
    session_id: &str,
    auth: &IpcAuthContext,
    handler: &Arc<dyn IpcHandler + Send + Sync>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = read_frame::<_, IpcFrame>(reader, line).await? {
        let req = match frame {
            IpcFrame::Request(r) => r,
            _ => return Err(reject(writer, "expected Request frame").await),
        };
        if req.session_id != session_id {
            return Err(reject(writer, "session mismatch").await);
        }
        if let Err(e) = auth.verify_and_update_nonce(session_id, req.nonce).await {
            return Err(reject(writer, &e.to_string()).await);
        }
        let response = match req.request {
            IpcRequest::Ping => IpcResponse::Pong,
            other => match handler.handle(client, other).await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(client, error = %e, "ipc handler error");
                    write_frame(
                        writer,
                        &IpcFrame::Error {
                            message: e.to_string(),
                        },
                    )
                    .await?;
                    continue;
                }
            },
        };
        write_frame(
            writer,
            &IpcFrame::Response(ResponseFrame {
                session_id: session_id.to_string(),
                nonce: req.nonce,
                response,
            }),
        )
        .await?;
    }
    Ok(())
}

#[cfg(unix)]
pub use self::unix::IpcServer;

#[cfg(unix)]
mod unix {
    use super::*;
    use crate::server::{Server, ServerError};
    use std::path::Path;
    use tracing::info;

    /// The daemon's listener plus the authentication layer every connection
    /// goes through before its requests reach the handler.
    pub struct IpcServer {
        auth: Arc<IpcAuthContext>,
        server: Server,
    }

    impl IpcServer {
        pub fn bind(
            shared_secret: Zeroizing<Vec<u8>>,
            socket_path: impl AsRef<Path>,
        ) -> Result<Self, ServerError> {
            Ok(Self {
                auth: Arc::new(IpcAuthContext::new(shared_secret)),
                server: Server::bind(socket_path)?,
            })
        }

        pub fn socket_path(&self) -> &Path {
            self.server.path()
        }

        pub fn close(&self) {
            self.server.close();
        }

        /// Accept loop. Each connection runs on its own task so a slow client
        /// never holds up the next accept. Returns `Ok` once closed.
        pub async fn start(
            self: Arc<Self>,
            handler: Arc<dyn IpcHandler + Send + Sync>,
        ) -> Result<(), ServerError> {
            loop {
                let conn = match self.server.accept().await {
                    Ok(conn) => conn,
                    Err(ServerError::Closed) => {
                        info!("ipc accept loop stopped");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                };
                let client = conn.id();
                let auth = self.auth.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let stream = conn.into_stream();
                    if let Err(e) = handle_connection(stream, client, auth, handler).await {
                        warn!(client, error = %e, "ipc connection error");
                    }
                    debug!(client, "ipc client disconnected");
                });
            }
        }
    }
}
