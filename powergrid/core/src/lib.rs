//! Powergrid Core - Battery Charge Limiting Logic
//!
//! This crate holds the whole decision core of the powergrid daemon,
//! independent of any concrete hardware backend or OS integration. It can
//! drive real charging hardware behind the [`telemetry::PowerSource`]
//! trait or run entirely against mocks in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Foreground Clients                     │
//! │        (CLI, menu bar apps, scripts - one socket each)       │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │
//!                  ClientRequest (up) / DaemonMessage (down)
//!                  length-prefixed JSON frames over a Unix socket
//!                             │
//! ┌───────────────────────────┼──────────────────────────────────┐
//! │                     POWERGRID DAEMON                         │
//! │  ┌────────────────────────┴───────────────────────────────┐  │
//! │  │                     PowerEngine                        │  │
//! │  │  ┌─────────┐ ┌─────────┐ ┌───────┐ ┌───────────────┐  │  │
//! │  │  │ Limits  │ │ Session │ │ Rules │ │ LED Control   │  │  │
//! │  │  │Resolver │ │ Tracker │ │Engine │ │ (idempotent)  │  │  │
//! │  │  └─────────┘ └─────────┘ └───────┘ └───────────────┘  │  │
//! │  └──────────────────────────┬─────────────────────────────┘  │
//! │                             │ PowerSource trait               │
//! │                  ┌──────────┴──────────┐                      │
//! │                  │  Hardware Backend   │                      │
//! │                  └─────────────────────┘                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`engine::PowerEngine`]: the single owner of all mutable state
//! - [`telemetry::PowerSource`]: the hardware/OS boundary trait
//! - [`protocol::ClientRequest`] / [`protocol::DaemonMessage`]: the wire
//!   protocol spoken over the control socket
//! - [`config::ConfigStore`]: durable per-scope charge preferences
//! - [`transport::UnixSocketServer`] / [`transport::UnixSocketClient`]:
//!   the framed local RPC transport
//!
//! # Module Overview
//!
//! - [`limits`]: effective charge limit resolution and clamp bounds
//! - [`config`]: JSON persistence for system and per-user preferences
//! - [`telemetry`]: snapshot types and the `PowerSource` trait
//! - [`engine`]: the control loop that ties everything together
//! - [`led`]: status LED priority logic and idempotent application
//! - [`rules`]: auto-cutoff and low-battery edge-triggered rules
//! - [`session`]: console session tracking
//! - [`protocol`]: control API request and message types
//! - [`transport`]: framed Unix-socket server and client

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod led;
pub mod limits;
pub mod protocol;
pub mod rules;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use config::{ChargeConfig, ConfigStore};
pub use engine::{EngineConfig, PowerEngine};
pub use led::LedTarget;
pub use limits::{BUILTIN_DEFAULT_LIMIT, DAEMON_BOUNDS, UI_BOUNDS};
pub use protocol::{ClientRequest, DaemonMessage, StatusReport, PROTOCOL_VERSION};
pub use rules::ForceDischargeMode;
pub use session::{Session, SessionSource};
pub use telemetry::{PowerEvent, PowerSource, TelemetrySnapshot};
pub use transport::{ConnectionId, UnixSocketClient, UnixSocketServer, DEFAULT_SOCKET_PATH};
