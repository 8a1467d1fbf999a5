//! Powergrid Daemon
//!
//! Privileged daemon enforcing battery charge limits. Foreground clients
//! (the `powergrid` CLI, status widgets) connect over a Unix socket.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (requires root)
//! powergrid-daemon
//!
//! # Custom socket and config directory
//! powergrid-daemon --socket /tmp/powergrid.sock --config-dir /tmp/powergrid
//!
//! # With verbose logging
//! RUST_LOG=debug powergrid-daemon
//! ```
//!
//! # Files
//!
//! - Socket: `/var/run/powergrid.sock`
//! - Config: `/var/lib/powergrid/system.json`, `/var/lib/powergrid/users/<uid>.json`
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: graceful shutdown (releases the LED, removes the socket)
//! - SIGUSR1: the system is about to sleep (sent by a system-sleep hook)
//! - SIGUSR2: the system woke up

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};

use powergrid_core::config::{ConfigStore, DEFAULT_CONFIG_DIR};
use powergrid_core::engine::{EngineConfig, PowerEngine};
use powergrid_core::session::SessionSource;
use powergrid_core::telemetry::PowerEvent;
use powergrid_core::transport::{UnixSocketServer, DEFAULT_SOCKET_PATH};

mod console_user;
mod power_sysfs;

use console_user::ConsoleSessionSource;
use power_sysfs::SysfsPowerSource;

/// Safety tick re-applying the charging rule even with no events.
const TICK_INTERVAL: Duration = Duration::from_secs(15);
/// Telemetry poll cadence.
const TELEMETRY_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Console ownership poll cadence; a change must hold for one interval
/// before it is applied (debounce against login-screen flicker).
const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Delay after wake before re-reading telemetry; drivers need a moment
/// to repopulate their attributes.
const WAKE_SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Battery charge-limit daemon
#[derive(Parser, Debug)]
#[command(name = "powergrid-daemon", version = build_id())]
struct Args {
    /// Control socket path
    #[arg(long, env = "POWERGRID_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Configuration directory
    #[arg(long, env = "POWERGRID_CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// LED device directory under /sys/class/leds to drive
    #[arg(long, env = "POWERGRID_LED")]
    led: Option<PathBuf>,

    /// Run without root (hardware writes will fail; for development)
    #[arg(long)]
    allow_unprivileged: bool,
}

fn build_id() -> &'static str {
    option_env!("POWERGRID_BUILD_ID").unwrap_or("dev")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("powergrid_daemon=info".parse()?)
                .add_directive("powergrid_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let args = Args::parse();

    info!(build = build_id(), pid = std::process::id(), "Starting powergrid daemon");

    if !nix::unistd::Uid::effective().is_root() && !args.allow_unprivileged {
        anyhow::bail!(
            "powergrid-daemon must run as root (use --allow-unprivileged for development)"
        );
    }

    let source = SysfsPowerSource::discover(args.led.clone())?;
    let store = ConfigStore::new(&args.config_dir);
    let (engine, mut notice_rx) = PowerEngine::new(
        source,
        store,
        EngineConfig {
            build_id: build_id().to_string(),
            ..EngineConfig::default()
        },
    );

    let engine = Arc::new(Mutex::new(engine));
    engine.lock().await.start()?;

    let mut server = UnixSocketServer::new(&args.socket);
    server.listen().map_err(|e| {
        error!(error = %e, path = ?args.socket, "Failed to bind control socket");
        anyhow::anyhow!(
            "failed to listen on {:?}: {e}. Is another daemon running?",
            args.socket
        )
    })?;
    let handle = server.handle();

    // Notices from the engine fan out to every connected client.
    let handle_for_notices = handle.clone();
    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            handle_for_notices.broadcast(notice).await;
        }
    });

    // Safety tick.
    let engine_for_tick = Arc::clone(&engine);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            engine_for_tick.lock().await.tick();
        }
    });

    // Telemetry poll.
    let engine_for_poll = Arc::clone(&engine);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TELEMETRY_POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            engine_for_poll
                .lock()
                .await
                .handle_power_event(PowerEvent::BatteryUpdate(None));
        }
    });

    // Console session watcher with a one-interval debounce: a freshly
    // observed identity is applied only once it repeats.
    let engine_for_session = Arc::clone(&engine);
    tokio::spawn(async move {
        let source = ConsoleSessionSource::new();
        let mut previous: Option<Option<u32>> = None;
        let mut interval = tokio::time::interval(SESSION_POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let observed = match source.current() {
                Ok(session) => session,
                Err(e) => {
                    warn!(error = %e, "Console read failed");
                    continue;
                }
            };
            let uid = observed.as_ref().map(|s| s.uid);
            if previous == Some(uid) {
                engine_for_session
                    .lock()
                    .await
                    .handle_session_observation(observed);
            }
            previous = Some(uid);
        }
    });

    // Sleep/wake hooks delivered as signals by a system-sleep script.
    let engine_for_sleep = Arc::clone(&engine);
    tokio::spawn(async move {
        let mut pre_sleep = match signal::unix::signal(signal::unix::SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to install SIGUSR1 handler");
                return;
            }
        };
        let mut post_wake = match signal::unix::signal(signal::unix::SignalKind::user_defined2()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to install SIGUSR2 handler");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = pre_sleep.recv() => {
                    info!("Pre-sleep hook");
                    engine_for_sleep.lock().await.handle_power_event(PowerEvent::WillSleep);
                }
                _ = post_wake.recv() => {
                    info!("Post-wake hook");
                    tokio::time::sleep(WAKE_SETTLE_DELAY).await;
                    engine_for_sleep.lock().await.handle_power_event(PowerEvent::DidWake);
                }
            }
        }
    });

    // Shutdown on Ctrl+C or SIGTERM.
    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
            }
        };
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut s) => {
                    s.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            () = ctrl_c => info!("Received Ctrl+C, shutting down"),
            () = terminate => info!("Received SIGTERM, shutting down"),
        }
        shutdown_signal.notify_one();
    });

    info!("Ready to accept connections");

    loop {
        tokio::select! {
            () = shutdown.notified() => break,
            accepted = server.accept() => match accepted {
                Ok((conn_id, mut request_rx)) => {
                    let engine = Arc::clone(&engine);
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        while let Some(request) = request_rx.recv().await {
                            let reply = engine.lock().await.handle_request(&conn_id, request);
                            if let Err(e) = handle.send_to(&conn_id, reply).await {
                                warn!(conn_id = %conn_id, error = %e, "Reply failed");
                                break;
                            }
                        }
                    });
                }
                Err(e) => error!(error = %e, "Accept failed"),
            },
        }
    }

    engine.lock().await.shutdown();
    server.shutdown().await;
    info!("Daemon stopped");
    Ok(())
}
