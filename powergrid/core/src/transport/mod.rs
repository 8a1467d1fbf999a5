//! Local RPC Transport
//!
//! Daemon and clients talk over a Unix domain socket carrying
//! length-prefixed JSON frames with a CRC32 integrity check. The daemon
//! side accepts many concurrent clients; each connection gets its own
//! channel pair, and unsolicited notices are broadcast to all of them.
//!
//! No network exposure and no cryptographic client authentication: the
//! socket lives on the local filesystem and any local user may query the
//! privileged daemon, matching the installed socket permissions.

pub mod frame;
pub mod unix_socket;

pub use frame::{FrameDecoder, MAX_FRAME_SIZE};
pub use unix_socket::{ServerHandle, UnixSocketClient, UnixSocketServer};

use thiserror::Error;

/// Default path of the daemon's listening socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/powergrid.sock";

/// Transport-layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying I/O failure
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be encoded or decoded
    #[error("frame error: {0}")]
    Frame(String),

    /// Payload corrupted in transit
    #[error("checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    ChecksumMismatch {
        /// Checksum carried in the frame header
        expected: u32,
        /// Checksum computed over the received payload
        actual: u32,
    },

    /// Could not reach the daemon
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Peer went away
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation invalid in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Channel to the peer task is gone
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Identifier for one accepted client connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a fresh connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("conn-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
