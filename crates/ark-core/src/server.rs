//! Unix-domain socket listener owned by the daemon.
//!
//! `Server::bind` walks `Unbound -> Starting -> Listening`; `accept` hands out
//! connections tagged with a process-lifetime sequence number; `close` moves
//! to `Closed` and wakes any pending `accept`.
//!
//! The socket file is chmod'ed to owner-only, but some platforms ignore
//! permissions on sockets. Peers must still authenticate on every connection
//! (see `ipc::handle_connection`).

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const SOCKET_MODE: u32 = 0o700;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot resolve socket path {}: {reason}", path.display())]
    Path { path: PathBuf, reason: String },

    #[error("cannot inspect existing entry at {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot remove stale socket {}: {source}", path.display())]
    RemoveStale {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("socket {} is already in use", path.display())]
    AddrInUse {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("permission denied binding {}", path.display())]
    Permission {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot bind {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot restrict permissions on {}: {source}", path.display())]
    Chmod {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("listener closed")]
    Closed,
}

/// What a caller needs to decide on a start-up or accept failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    Path,
    Permission,
    InUse,
    Io,
    Closed,
}

impl ServerError {
    pub fn kind(&self) -> ServerErrorKind {
        match self {
            ServerError::Path { .. } => ServerErrorKind::Path,
            ServerError::Permission { .. } => ServerErrorKind::Permission,
            ServerError::AddrInUse { .. } => ServerErrorKind::InUse,
            ServerError::Closed => ServerErrorKind::Closed,
            ServerError::Stat { source, .. }
            | ServerError::RemoveStale { source, .. }
            | ServerError::Chmod { source, .. }
            | ServerError::Bind { source, .. }
            | ServerError::Accept(source) => {
                if source.kind() == io::ErrorKind::PermissionDenied {
                    ServerErrorKind::Permission
                } else {
                    ServerErrorKind::Io
                }
            }
        }
    }
}

/// One accepted local client.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    stream: UnixStream,
}

impl Connection {
    /// Sequence number assigned at accept time; starts at 1, never reused.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stream_mut(&mut self) -> &mut UnixStream {
        &mut self.stream
    }

    pub fn into_stream(self) -> UnixStream {
        self.stream
    }
}

pub struct Server {
    listener: UnixListener,
    path: PathBuf,
    accepted: AtomicU64,
    closed: watch::Sender<bool>,
}

impl Server {
    /// Resolve, clear, bind and restrict the socket at `path`.
    ///
    /// Any existing entry at `path` is removed first. Refusing to replace a
    /// live daemon's socket is the caller's job (pid file or lock) and must
    /// happen before this runs.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = resolve_socket_path(path.as_ref())?;

        match std::fs::symlink_metadata(&path) {
            Ok(_) => {
                debug!(path = %path.display(), "removing stale socket entry");
                std::fs::remove_file(&path).map_err(|source| ServerError::RemoveStale {
                    path: path.clone(),
                    source,
                })?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ServerError::Stat {
                    path: path.clone(),
                    source,
                })
            }
        }

        let listener = UnixListener::bind(&path).map_err(|source| bind_error(&path, source))?;

        if let Err(source) =
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(SOCKET_MODE))
        {
            let _ = std::fs::remove_file(&path);
            return Err(ServerError::Chmod { path, source });
        }

        info!(path = %path.display(), "ipc socket listening");
        let (closed, _) = watch::channel(false);
        Ok(Self {
            listener,
            path,
            accepted: AtomicU64::new(0),
            closed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of connections accepted so far (also the last id handed out).
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait for the next client. Returns `ServerError::Closed` promptly once
    /// `close` has been called, including for an accept already in flight.
    pub async fn accept(&self) -> Result<Connection, ServerError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(ServerError::Closed);
        }
        tokio::select! {
            res = self.listener.accept() => {
                let (stream, _addr) = res.map_err(ServerError::Accept)?;
                let id = self.accepted.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(client = id, "accepted ipc client");
                Ok(Connection { id, stream })
            }
            _ = closed.changed() => Err(ServerError::Closed),
        }
    }

    /// Stop accepting and remove the socket file. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove socket file");
            }
        }
        info!(path = %self.path.display(), accepted = self.accepted(), "ipc socket closed");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

fn resolve_socket_path(path: &Path) -> Result<PathBuf, ServerError> {
    let path_err = |reason: &str| ServerError::Path {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    if path.as_os_str().is_empty() {
        return Err(path_err("empty path"));
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| path_err(&format!("current directory unavailable: {e}")))?
            .join(path)
    };
    if absolute.file_name().is_none() {
        return Err(path_err("path has no file name"));
    }
    let parent = absolute
        .parent()
        .ok_or_else(|| path_err("path has no parent directory"))?;
    match std::fs::metadata(parent) {
        Ok(meta) if meta.is_dir() => Ok(absolute),
        Ok(_) => Err(path_err("parent is not a directory")),
        Err(source) => Err(parent_error(path, source)),
    }
}

fn parent_error(path: &Path, source: io::Error) -> ServerError {
    let path = path.to_path_buf();
    match source.kind() {
        io::ErrorKind::PermissionDenied => ServerError::Permission { path, source },
        io::ErrorKind::NotFound => ServerError::Path {
            path,
            reason: "parent directory does not exist".to_string(),
        },
        _ => ServerError::Stat { path, source },
    }
}

fn bind_error(path: &Path, source: io::Error) -> ServerError {
    let path = path.to_path_buf();
    match source.kind() {
        io::ErrorKind::AddrInUse => ServerError::AddrInUse { path, source },
        io::ErrorKind::PermissionDenied => ServerError::Permission { path, source },
        // Too long for sun_path, or a component vanished underneath us.
        io::ErrorKind::InvalidInput | io::ErrorKind::NotFound => ServerError::Path {
            path,
            reason: source.to_string(),
        },
        _ => ServerError::Bind { path, source },
    }
}
