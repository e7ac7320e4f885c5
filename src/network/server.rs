use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::core::{Error, Result, ServerConfig, ServerMode, SharedState};
use crate::protocol::{dispatch, FrameCodec};

/// Permissions of the bound socket file
const SOCKET_MODE: u32 = 0o660;

/// Unix socket server answering client frames from the registry
pub struct ProtocolServer {
    listener: UnixListener,
    path: PathBuf,
    mode: ServerMode,
    connections: Arc<Semaphore>,
    read_timeout: Option<Duration>,
    shared: Arc<SharedState>,
}

impl ProtocolServer {
    /// Binds the configured socket path, replacing a stale socket file.
    ///
    /// Anything at the path that is not a socket is left alone and the
    /// bind fails.
    pub fn bind(config: &ServerConfig, shared: Arc<SharedState>) -> Result<Self> {
        let path = config.socket_path.clone();
        remove_stale_socket(&path)?;

        let listener = UnixListener::bind(&path).map_err(|e| {
            Error::Io(io::Error::new(
                e.kind(),
                format!("failed to bind {}: {}", path.display(), e),
            ))
        })?;
        set_socket_permissions(&path)?;

        info!(socket = %path.display(), mode = ?config.mode, "Protocol server bound");
        Ok(ProtocolServer {
            listener,
            path,
            mode: config.mode,
            connections: Arc::new(Semaphore::new(config.max_connections.max(1))),
            read_timeout: config.read_timeout,
            shared,
        })
    }

    /// Path of the bound socket
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serves clients until the shared fault flag is raised.
    ///
    /// Receive errors and accept failures raise the flag and end serving.
    /// A client that hangs up before reading its answers only loses its
    /// own connection.
    pub async fn serve(self) -> Result<()> {
        let result = match self.mode {
            ServerMode::Sequential => self.serve_sequential().await,
            ServerMode::Concurrent => self.serve_concurrent().await,
        };
        self.cleanup();
        if let Err(e) = &result {
            error!(error = %e, "Protocol server failed");
            self.shared.fault.raise(format!("server: {}", e));
        }
        result
    }

    async fn serve_sequential(&self) -> Result<()> {
        loop {
            let stream = tokio::select! {
                accepted = self.listener.accept() => accepted?.0,
                _ = self.shared.fault.raised() => return Ok(()),
            };
            debug!("Client connected");

            handle_connection(stream, &self.shared, self.read_timeout).await?;
        }
    }

    async fn serve_concurrent(&self) -> Result<()> {
        loop {
            let permit = tokio::select! {
                permit = self.connections.clone().acquire_owned() => permit
                    .map_err(|_| Error::fatal("connection limit closed"))?,
                _ = self.shared.fault.raised() => return Ok(()),
            };
            let stream = tokio::select! {
                accepted = self.listener.accept() => accepted?.0,
                _ = self.shared.fault.raised() => return Ok(()),
            };
            debug!(available = self.connections.available_permits(), "Client connected");

            let shared = self.shared.clone();
            let read_timeout = self.read_timeout;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, &shared, read_timeout).await {
                    error!(error = %e, "Client connection failed");
                    shared.fault.raise(format!("server: {}", e));
                }
                drop(permit);
            });
        }
    }

    fn cleanup(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(socket = %self.path.display(), "Removed socket file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(socket = %self.path.display(), error = %e, "Cannot remove socket file"),
        }
    }
}

/// Binds and serves until the fault flag is raised. Bind and serve
/// failures raise it.
pub async fn run(config: ServerConfig, shared: Arc<SharedState>) {
    let server = match ProtocolServer::bind(&config, shared.clone()) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Cannot start protocol server");
            shared.fault.raise(format!("server: {}", e));
            return;
        }
    };
    if let Err(e) = server.serve().await {
        error!(error = %e, "Protocol server stopped");
        shared.fault.raise(format!("server: {}", e));
    }
}

/// Answers frames from one client until it disconnects
async fn handle_connection(
    stream: UnixStream,
    shared: &SharedState,
    read_timeout: Option<Duration>,
) -> Result<()> {
    let mut framed = Framed::new(stream, FrameCodec::new());

    loop {
        let next = tokio::select! {
            next = read_frame(&mut framed, read_timeout) => next,
            _ = shared.fault.raised() => return Ok(()),
        };
        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("Client disconnected");
                return Ok(());
            }
            Err(Error::Io(e)) if is_hang_up(&e) => {
                debug!(error = %e, "Client hung up");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let response = dispatch(&shared.registry, &frame).await;
        if let Err(e) = framed.send(response).await {
            warn!(error = %e, "Cannot answer client, closing connection");
            return Ok(());
        }
    }
}

/// Errors meaning the peer went away rather than the socket failing
fn is_hang_up(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

/// Next frame, or `None` at end of stream or once the idle limit passes
async fn read_frame(
    framed: &mut Framed<UnixStream, FrameCodec>,
    read_timeout: Option<Duration>,
) -> Result<Option<crate::protocol::Frame>> {
    let next = match read_timeout {
        Some(limit) => match tokio::time::timeout(limit, framed.next()).await {
            Ok(next) => next,
            Err(_) => {
                info!(?limit, "Closing idle client");
                return Ok(None);
            }
        },
        None => framed.next().await,
    };
    next.transpose()
}

fn remove_stale_socket(path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if !metadata.file_type().is_socket() {
            return Err(Error::config(format!(
                "{} exists and is not a socket",
                path.display()
            )));
        }
    }

    std::fs::remove_file(path)?;
    debug!(path = %path.display(), "Removed stale socket file");
    Ok(())
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
