use crate::ipc::{
    compute_proof, random_hex, read_frame, write_frame, AuthOk, ClientAuth, ClientHello, IpcFrame,
    IpcRequest, IpcResponse, RequestFrame, ResponseFrame, CLI_CLIENT_ID, IPC_PROTOCOL_VERSION,
};
use anyhow::{anyhow, Result};
use std::path::Path;
use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

/// Authenticated connection to the daemon. Requests on one client are
/// strictly sequential: each `send` waits for its response.
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    session_id: String,
    nonce: u64,
    line: String,
}

impl IpcClient {
    pub async fn connect(socket_path: impl AsRef<Path>, secret: &[u8]) -> Result<Self> {
        let stream = UnixStream::connect(socket_path.as_ref()).await?;
        let (read_half, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer,
            session_id: String::new(),
            nonce: 0,
            line: String::new(),
        };
        client.handshake(secret).await?;
        Ok(client)
    }

    async fn handshake(&mut self, secret: &[u8]) -> Result<()> {
        let hello = IpcFrame::ClientHello(ClientHello {
            protocol_version: IPC_PROTOCOL_VERSION,
            client_id: CLI_CLIENT_ID.to_string(),
        });
        write_frame(&mut self.writer, &hello).await?;

        let challenge = match self.next_frame().await? {
            IpcFrame::ServerChallenge(c) => c,
            IpcFrame::Error { message } => return Err(anyhow!("server error: {message}")),
            _ => return Err(anyhow!("expected ServerChallenge")),
        };

        let client_nonce = random_hex(32);
        let proof = compute_proof(secret, &challenge.server_nonce, &client_nonce)?;
        let auth = IpcFrame::ClientAuth(ClientAuth {
            session_id: challenge.session_id,
            client_nonce,
            proof,
        });
        write_frame(&mut self.writer, &auth).await?;

        match self.next_frame().await? {
            IpcFrame::AuthOk(AuthOk { session_id }) => {
                self.session_id = session_id;
                Ok(())
            }
            IpcFrame::Error { message } => Err(anyhow!("auth failed: {message}")),
            _ => Err(anyhow!("expected AuthOk")),
        }
    }

    pub async fn send(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        self.nonce += 1;
        let frame = IpcFrame::Request(RequestFrame {
            session_id: self.session_id.clone(),
            nonce: self.nonce,
            request,
        });
        write_frame(&mut self.writer, &frame).await?;

        match self.next_frame().await? {
            IpcFrame::Response(ResponseFrame { nonce, response, .. }) if nonce == self.nonce => {
                Ok(response)
            }
            IpcFrame::Response(_) => Err(anyhow!("response out of order")),
            IpcFrame::Error { message } => Err(anyhow!("request failed: {message}")),
            _ => Err(anyhow!("unexpected response")),
        }
    }

    async fn next_frame(&mut self) -> Result<IpcFrame> {
        read_frame(&mut self.reader, &mut self.line)
            .await?
            .ok_or_else(|| anyhow!("daemon closed the connection"))
    }
}

/// Connect, send one request, hang up.
pub async fn send_request(
    socket_path: impl AsRef<Path>,
    secret: &[u8],
    request: IpcRequest,
) -> Result<IpcResponse> {
    let mut client = IpcClient::connect(socket_path, secret).await?;
    client.send(request).await
}
