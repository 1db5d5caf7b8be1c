//! Socket server lifecycle: binding, sequence numbers, shutdown.

#![cfg(unix)]

use ark_core::server::{Server, ServerError, ServerErrorKind, SOCKET_MODE};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::net::UnixStream;

#[tokio::test]
async fn client_ids_are_gap_free_from_one() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ark.sock");
    let server = Server::bind(&path).unwrap();

    let mut ids = Vec::new();
    for _ in 0..5 {
        let _client = UnixStream::connect(&path).await.unwrap();
        let conn = server.accept().await.unwrap();
        ids.push(conn.id());
    }
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(server.accepted(), 5);
}

#[tokio::test]
async fn ids_are_not_reused_after_disconnect() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ark.sock");
    let server = Server::bind(&path).unwrap();

    let client = UnixStream::connect(&path).await.unwrap();
    let first = server.accept().await.unwrap();
    drop(client);
    drop(first);

    let _client = UnixStream::connect(&path).await.unwrap();
    assert_eq!(server.accept().await.unwrap().id(), 2);
}

#[tokio::test]
async fn stale_entry_is_replaced() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ark.sock");
    std::fs::write(&path, b"left over from a crashed daemon").unwrap();

    let server = Server::bind(&path).unwrap();
    let meta = std::fs::symlink_metadata(&path).unwrap();
    assert!(meta.file_type().is_socket());
    assert_eq!(server.path(), path.as_path());
}

#[tokio::test]
async fn socket_is_owner_only() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ark.sock");
    let _server = Server::bind(&path).unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, SOCKET_MODE);
}

#[tokio::test]
async fn missing_parent_is_a_path_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("does-not-exist").join("ark.sock");
    let err = Server::bind(&path).err().expect("bind must fail");
    assert_eq!(err.kind(), ServerErrorKind::Path);
    assert!(matches!(err, ServerError::Path { .. }));
}

#[tokio::test]
async fn file_as_parent_is_a_path_error() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("plain");
    std::fs::write(&file, b"").unwrap();
    let err = Server::bind(file.join("ark.sock")).err().expect("bind must fail");
    assert_eq!(err.kind(), ServerErrorKind::Path);
}

#[tokio::test]
async fn unsearchable_parent_is_a_permission_error() {
    let dir = tempdir().unwrap();
    let locked = dir.path().join("locked");
    let inner = locked.join("inner");
    std::fs::create_dir_all(&inner).unwrap();
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
    let unlock = || std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o700));

    // root searches through mode 000, so there is nothing to observe.
    if std::fs::metadata(&inner).is_ok() {
        unlock().unwrap();
        return;
    }
    let res = Server::bind(inner.join("ark.sock"));
    unlock().unwrap();

    let err = res.err().expect("bind must fail");
    assert_eq!(err.kind(), ServerErrorKind::Permission);
    assert!(matches!(err, ServerError::Permission { .. }));
}

#[tokio::test]
async fn overlong_path_is_a_path_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("s".repeat(200));
    let err = Server::bind(&path).err().expect("bind must fail");
    assert_eq!(err.kind(), ServerErrorKind::Path);
}

#[tokio::test]
async fn close_wakes_pending_accept_and_removes_socket() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ark.sock");
    let server = Arc::new(Server::bind(&path).unwrap());

    let pending = {
        let server = server.clone();
        tokio::spawn(async move { server.accept().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.close();

    let res = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("accept did not wake up")
        .unwrap();
    assert!(matches!(res, Err(ServerError::Closed)));
    assert!(!path.exists());

    // Second close is a no-op, later accepts fail immediately.
    server.close();
    assert!(server.is_closed());
    assert!(matches!(server.accept().await, Err(ServerError::Closed)));
}

#[tokio::test]
async fn relative_path_resolves_against_current_dir() {
    let dir = tempdir().unwrap();
    let cwd = std::env::current_dir().unwrap();
    let relative = pathdiff(dir.path(), &cwd).join("ark.sock");

    let server = Server::bind(&relative).unwrap();
    assert!(server.path().is_absolute());
    assert!(dir.path().join("ark.sock").exists());
}

// Relative path from `base` to `target` built from `..` components.
fn pathdiff(target: &std::path::Path, base: &std::path::Path) -> std::path::PathBuf {
    let mut rel = std::path::PathBuf::new();
    for _ in base.components().skip(1) {
        rel.push("..");
    }
    for c in target.components().skip(1) {
        rel.push(c);
    }
    rel
}
