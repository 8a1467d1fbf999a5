//! Daemon-side Unix socket transport.
//!
//! Accepts client connections, spawns a read/write task pair per
//! connection, and hands the accept caller a per-connection stream of
//! decoded requests.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, RwLock};

use crate::protocol::{ClientRequest, DaemonMessage};
use crate::transport::frame::{encode, FrameDecoder};
use crate::transport::{ConnectionId, TransportError};

const CHANNEL_CAPACITY: usize = 100;

/// Listening side of the control API.
pub struct UnixSocketServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
}

struct ConnectionHandle {
    tx: mpsc::Sender<DaemonMessage>,
}

/// Cheap cloneable sender over the live connection set. Lets reply and
/// broadcast tasks send without contending for the listener itself.
#[derive(Clone)]
pub struct ServerHandle {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
}

impl ServerHandle {
    /// Send a message to one connection.
    pub async fn send_to(
        &self,
        conn_id: &ConnectionId,
        msg: DaemonMessage,
    ) -> Result<(), TransportError> {
        let connections = self.connections.read().await;
        let handle = connections
            .get(conn_id)
            .ok_or_else(|| TransportError::SendFailed(format!("unknown connection: {conn_id}")))?;
        handle
            .tx
            .send(msg)
            .await
            .map_err(|_| TransportError::SendFailed("channel closed".to_string()))
    }

    /// Push a message to every connected client (used for notices).
    pub async fn broadcast(&self, msg: DaemonMessage) {
        let connections = self.connections.read().await;
        for (conn_id, handle) in connections.iter() {
            if handle.tx.send(msg.clone()).await.is_err() {
                tracing::debug!(conn_id = %conn_id, "Broadcast to closing connection skipped");
            }
        }
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl UnixSocketServer {
    /// Server that will bind `socket_path` when [`Self::listen`] is called.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            listener: None,
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The configured socket path.
    #[must_use]
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Bind the socket: create the parent directory, remove a stale socket
    /// file, listen, and open permissions so unprivileged clients can
    /// connect. This is the one startup step whose failure is fatal to
    /// the daemon.
    pub fn listen(&mut self) -> Result<(), TransportError> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if self.socket_path.exists() {
            tracing::warn!(path = ?self.socket_path, "Removing stale socket file");
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o666))?;
        self.listener = Some(listener);

        tracing::info!(path = ?self.socket_path, "Control API listening");
        Ok(())
    }

    /// Accept one client. Returns the connection id and the stream of
    /// requests decoded from that client.
    pub async fn accept(
        &mut self,
    ) -> Result<(ConnectionId, mpsc::Receiver<ClientRequest>), TransportError> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| TransportError::InvalidState("not listening".to_string()))?;

        let (stream, _addr) = listener.accept().await?;
        let conn_id = ConnectionId::new();
        if let Some((uid, pid)) = peer_credentials(&stream) {
            tracing::info!(conn_id = %conn_id, peer_uid = uid, peer_pid = pid, "Client connected");
        } else {
            tracing::info!(conn_id = %conn_id, "Client connected (peer credentials unavailable)");
        }

        let (request_tx, request_rx) = mpsc::channel::<ClientRequest>(CHANNEL_CAPACITY);
        let (msg_tx, mut msg_rx) = mpsc::channel::<DaemonMessage>(CHANNEL_CAPACITY);

        let (mut read_half, mut write_half) = stream.into_split();

        // Read task: socket -> decoded requests.
        let conn_id_read = conn_id.clone();
        let connections_read = Arc::clone(&self.connections);
        tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 4096];

            'conn: loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => {
                        tracing::debug!(conn_id = %conn_id_read, "Connection closed by peer");
                        break;
                    }
                    Ok(n) => {
                        decoder.push(&buf[..n]);
                        loop {
                            match decoder.decode::<ClientRequest>() {
                                Ok(Some(request)) => {
                                    if request_tx.send(request).await.is_err() {
                                        tracing::debug!(
                                            conn_id = %conn_id_read,
                                            "Request receiver dropped"
                                        );
                                        break 'conn;
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    tracing::warn!(
                                        conn_id = %conn_id_read,
                                        error = %e,
                                        "Dropping connection on frame error"
                                    );
                                    break 'conn;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(conn_id = %conn_id_read, error = %e, "Read error");
                        break;
                    }
                }
            }

            connections_read.write().await.remove(&conn_id_read);
            tracing::info!(conn_id = %conn_id_read, "Connection ended");
        });

        // Write task: queued messages -> socket.
        let conn_id_write = conn_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                match encode(&msg) {
                    Ok(data) => {
                        if let Err(e) = write_half.write_all(&data).await {
                            tracing::warn!(conn_id = %conn_id_write, error = %e, "Write error");
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(conn_id = %conn_id_write, error = %e, "Encode error");
                    }
                }
            }
        });

        self.connections
            .write()
            .await
            .insert(conn_id.clone(), ConnectionHandle { tx: msg_tx });

        Ok((conn_id, request_rx))
    }

    /// A sender handle detached from the listener, usable by reply and
    /// broadcast tasks without blocking `accept`.
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            connections: Arc::clone(&self.connections),
        }
    }

    /// Send a message to one connection.
    pub async fn send_to(
        &self,
        conn_id: &ConnectionId,
        msg: DaemonMessage,
    ) -> Result<(), TransportError> {
        self.handle().send_to(conn_id, msg).await
    }

    /// Push a message to every connected client.
    pub async fn broadcast(&self, msg: DaemonMessage) {
        self.handle().broadcast(msg).await;
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Stop accepting, drop all connections, remove the socket file.
    pub async fn shutdown(&mut self) {
        self.listener = None;
        self.connections.write().await.clear();
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!(error = %e, "Failed to remove socket file");
            }
        }
        tracing::info!("Control API shut down");
    }
}

impl Drop for UnixSocketServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).ok();
        }
    }
}

/// Read SO_PEERCRED from a connected stream (Linux). Used for logging
/// only; connections are not rejected by uid.
fn peer_credentials(stream: &UnixStream) -> Option<(u32, i32)> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;

        let fd = stream.as_raw_fd();
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                std::ptr::addr_of_mut!(cred).cast(),
                &mut len,
            )
        };
        if rc == 0 {
            return Some((cred.uid, cred.pid));
        }
        None
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = stream;
        None
    }
}
