//! End-to-end protocol tests over a real socket.

#![cfg(unix)]

use anyhow::Result;
use ark_core::ipc::{
    compute_proof, read_frame, write_frame, ClientAuth, ClientHello, IpcFrame, IpcHandler,
    IpcRequest, IpcResponse, IpcServer, RequestFrame, CLI_CLIENT_ID, IPC_PROTOCOL_VERSION,
    MAX_FRAME_LEN,
};
use ark_core::ipc_client::IpcClient;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use zeroize::Zeroizing;

const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

#[derive(Default)]
struct CountingHandler {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl IpcHandler for CountingHandler {
    async fn handle(&self, client: u64, req: IpcRequest) -> Result<IpcResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match req {
            IpcRequest::Status => Ok(IpcResponse::Status {
                client,
                logged_in: false,
                username: None,
            }),
            _ => Ok(IpcResponse::LoggedOut),
        }
    }
}

async fn start() -> (tempfile::TempDir, Arc<IpcServer>, Arc<CountingHandler>) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ark.sock");
    let server =
        Arc::new(IpcServer::bind(Zeroizing::new(SECRET.to_vec()), &path).unwrap());
    let handler = Arc::new(CountingHandler::default());
    tokio::spawn(server.clone().start(handler.clone()));
    (dir, server, handler)
}

#[tokio::test]
async fn authenticated_client_is_served_in_order() {
    let (_dir, server, handler) = start().await;
    let mut client = IpcClient::connect(server.socket_path(), SECRET).await.unwrap();

    assert!(matches!(
        client.send(IpcRequest::Ping).await.unwrap(),
        IpcResponse::Pong
    ));
    match client.send(IpcRequest::Status).await.unwrap() {
        IpcResponse::Status { client, .. } => assert_eq!(client, 1),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    server.close();
}

#[tokio::test]
async fn wrong_secret_never_reaches_handler() {
    let (_dir, server, handler) = start().await;
    let res = IpcClient::connect(server.socket_path(), b"not the secret").await;
    assert!(res.is_err());
    assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

    // The next, honest client still gets the next sequence number.
    let mut client = IpcClient::connect(server.socket_path(), SECRET).await.unwrap();
    match client.send(IpcRequest::Status).await.unwrap() {
        IpcResponse::Status { client, .. } => assert_eq!(client, 2),
        other => panic!("unexpected {other:?}"),
    }
    server.close();
}

#[tokio::test]
async fn replayed_nonce_is_rejected() {
    let (_dir, server, handler) = start().await;
    let stream = UnixStream::connect(server.socket_path()).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    write_frame(
        &mut writer,
        &IpcFrame::ClientHello(ClientHello {
            protocol_version: IPC_PROTOCOL_VERSION,
            client_id: CLI_CLIENT_ID.to_string(),
        }),
    )
    .await
    .unwrap();
    let challenge = match read_frame::<_, IpcFrame>(&mut reader, &mut line).await.unwrap() {
        Some(IpcFrame::ServerChallenge(c)) => c,
        other => panic!("unexpected {other:?}"),
    };
    let proof = compute_proof(SECRET, &challenge.server_nonce, "client-nonce").unwrap();
    write_frame(
        &mut writer,
        &IpcFrame::ClientAuth(ClientAuth {
            session_id: challenge.session_id.clone(),
            client_nonce: "client-nonce".to_string(),
            proof,
        }),
    )
    .await
    .unwrap();
    assert!(matches!(
        read_frame::<_, IpcFrame>(&mut reader, &mut line).await.unwrap(),
        Some(IpcFrame::AuthOk(_))
    ));

    let request = IpcFrame::Request(RequestFrame {
        session_id: challenge.session_id.clone(),
        nonce: 7,
        request: IpcRequest::Status,
    });
    write_frame(&mut writer, &request).await.unwrap();
    assert!(matches!(
        read_frame::<_, IpcFrame>(&mut reader, &mut line).await.unwrap(),
        Some(IpcFrame::Response(_))
    ));

    write_frame(&mut writer, &request).await.unwrap();
    assert!(matches!(
        read_frame::<_, IpcFrame>(&mut reader, &mut line).await.unwrap(),
        Some(IpcFrame::Error { .. })
    ));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    server.close();
}

#[tokio::test]
async fn unknown_client_id_is_refused() {
    let (_dir, server, _handler) = start().await;
    let stream = UnixStream::connect(server.socket_path()).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    write_frame(
        &mut writer,
        &IpcFrame::ClientHello(ClientHello {
            protocol_version: IPC_PROTOCOL_VERSION,
            client_id: "browser-extension".to_string(),
        }),
    )
    .await
    .unwrap();
    assert!(matches!(
        read_frame::<_, IpcFrame>(&mut reader, &mut line).await.unwrap(),
        Some(IpcFrame::Error { .. })
    ));
    server.close();
}

#[tokio::test]
async fn unbounded_line_before_hello_is_dropped() {
    let (_dir, server, handler) = start().await;
    let stream = UnixStream::connect(server.socket_path()).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    // The daemon hangs up mid-write, so the tail may fail with EPIPE.
    let _ = writer.write_all(&vec![b'{'; MAX_FRAME_LEN * 2]).await;
    let res = read_frame::<_, IpcFrame>(&mut reader, &mut line).await;
    assert!(!matches!(res, Ok(Some(_))));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

    let mut client = IpcClient::connect(server.socket_path(), SECRET).await.unwrap();
    match client.send(IpcRequest::Status).await.unwrap() {
        IpcResponse::Status { client, .. } => assert_eq!(client, 2),
        other => panic!("unexpected {other:?}"),
    }
    server.close();
}
