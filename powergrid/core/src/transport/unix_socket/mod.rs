//! Unix Socket Transport
//!
//! The daemon listens on a well-known socket path (see
//! [`super::DEFAULT_SOCKET_PATH`]); foreground clients connect to it.
//! Frames flow as [`crate::protocol::ClientRequest`] upstream and
//! [`crate::protocol::DaemonMessage`] downstream.
//!
//! The socket is world-connectable (mode 0666): the daemon runs
//! privileged, clients run as ordinary users, and the control surface is
//! deliberately open to local sessions. Peer credentials are still read
//! via `SO_PEERCRED` for logging.

mod client;
mod server;

pub use client::UnixSocketClient;
pub use server::{ServerHandle, UnixSocketServer};
