//! Client-side Unix socket transport.
//!
//! Thin connection wrapper used by foreground tools: connect, send one
//! request at a time, read decoded daemon messages.

use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::protocol::{ClientRequest, DaemonMessage};
use crate::transport::frame::{encode, FrameDecoder};
use crate::transport::TransportError;

/// Connection to a running daemon.
pub struct UnixSocketClient {
    socket_path: PathBuf,
    stream: Option<UnixStream>,
    decoder: FrameDecoder,
}

impl UnixSocketClient {
    /// Client that will dial `socket_path` on [`Self::connect`].
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            stream: None,
            decoder: FrameDecoder::new(),
        }
    }

    /// Dial the daemon socket.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "{}: {e}",
                self.socket_path.display()
            ))
        })?;
        self.stream = Some(stream);
        self.decoder = FrameDecoder::new();
        Ok(())
    }

    /// Whether a connection is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Send one request frame.
    pub async fn send(&mut self, request: &ClientRequest) -> Result<(), TransportError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::InvalidState("not connected".to_string()))?;
        let data = encode(request)?;
        stream.write_all(&data).await?;
        Ok(())
    }

    /// Wait for the next daemon message.
    ///
    /// Returns [`TransportError::ConnectionClosed`] on clean EOF.
    pub async fn recv(&mut self) -> Result<DaemonMessage, TransportError> {
        loop {
            if let Some(msg) = self.decoder.decode::<DaemonMessage>()? {
                return Ok(msg);
            }

            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| TransportError::InvalidState("not connected".to_string()))?;
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                self.stream = None;
                return Err(TransportError::ConnectionClosed);
            }
            self.decoder.push(&buf[..n]);
        }
    }

    /// Drop the connection.
    pub fn disconnect(&mut self) {
        self.stream = None;
    }
}
