//! Powergrid CLI
//!
//! Command-line client for the powergrid daemon. Connects to the control
//! socket, performs the protocol handshake, issues one request, and
//! prints the result.
//!
//! ```bash
//! powergrid status
//! powergrid limit 80
//! powergrid feature control-led on
//! powergrid version
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};

use powergrid_core::protocol::{
    ClientRequest, DaemonMessage, PowerFeature, RequestId, StatusReport, PROTOCOL_VERSION,
};
use powergrid_core::transport::{UnixSocketClient, DEFAULT_SOCKET_PATH};
use powergrid_core::UI_BOUNDS;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Control the battery charge-limit daemon
#[derive(Parser, Debug)]
#[command(name = "powergrid", version)]
struct Args {
    /// Daemon control socket path
    #[arg(long, env = "POWERGRID_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show battery, adapter, and daemon state
    Status,
    /// Set the charge limit for the active session
    Limit {
        /// Limit percentage (clamped to 60-100)
        percent: u8,
    },
    /// Toggle a power feature
    Feature {
        /// Which feature
        name: FeatureName,
        /// Desired state
        state: Toggle,
    },
    /// Show the daemon's build identity
    Version,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FeatureName {
    PreventDisplaySleep,
    PreventSystemSleep,
    ForceDischarge,
    ForceDischargeAuto,
    ControlLed,
    DisableChargingBeforeSleep,
    LowPowerMode,
}

impl From<FeatureName> for PowerFeature {
    fn from(name: FeatureName) -> Self {
        match name {
            FeatureName::PreventDisplaySleep => Self::PreventDisplaySleep,
            FeatureName::PreventSystemSleep => Self::PreventSystemSleep,
            FeatureName::ForceDischarge => Self::ForceDischarge,
            FeatureName::ForceDischargeAuto => Self::ForceDischargeAuto,
            FeatureName::ControlLed => Self::ControlLed,
            FeatureName::DisableChargingBeforeSleep => Self::DisableChargingBeforeSleep,
            FeatureName::LowPowerMode => Self::LowPowerMode,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut client = UnixSocketClient::new(&args.socket);
    client.connect().await.with_context(|| {
        format!(
            "could not connect to the daemon at {} (is powergrid-daemon running?)",
            args.socket.display()
        )
    })?;

    handshake(&mut client).await?;

    match args.command {
        Command::Status => {
            let request_id = RequestId::new();
            client
                .send(&ClientRequest::GetStatus {
                    request_id: request_id.clone(),
                })
                .await?;
            match wait_for_reply(&mut client, &request_id).await? {
                DaemonMessage::Status { report, .. } => print_status(&report),
                other => bail!("unexpected reply: {other:?}"),
            }
        }

        Command::Limit { percent } => {
            let clamped = normalize_limit(percent)?;
            if clamped != percent {
                eprintln!("note: {percent}% is out of range, using {clamped}%");
            }
            let request_id = RequestId::new();
            client
                .send(&ClientRequest::SetChargeLimit {
                    request_id: request_id.clone(),
                    limit: clamped,
                })
                .await?;
            wait_for_reply(&mut client, &request_id).await?;
            println!("Charge limit set to {clamped}%");
        }

        Command::Feature { name, state } => {
            let request_id = RequestId::new();
            let enable = matches!(state, Toggle::On);
            client
                .send(&ClientRequest::SetPowerFeature {
                    request_id: request_id.clone(),
                    feature: name.into(),
                    enable,
                })
                .await?;
            wait_for_reply(&mut client, &request_id).await?;
            println!(
                "{:?} turned {}",
                name,
                if enable { "on" } else { "off" }
            );
        }

        Command::Version => {
            let request_id = RequestId::new();
            client
                .send(&ClientRequest::GetVersion {
                    request_id: request_id.clone(),
                })
                .await?;
            match wait_for_reply(&mut client, &request_id).await? {
                DaemonMessage::Version { build_id, .. } => println!("powergrid-daemon {build_id}"),
                other => bail!("unexpected reply: {other:?}"),
            }
        }
    }

    Ok(())
}

/// Clamp a requested limit into the client-facing range. Zero is the
/// daemon's "unset" sentinel and would pass through the clamp, so it is
/// rejected outright.
fn normalize_limit(percent: u8) -> anyhow::Result<u8> {
    if percent == 0 {
        bail!(
            "charge limit must be between {}% and {}%",
            UI_BOUNDS.min,
            UI_BOUNDS.max
        );
    }
    Ok(UI_BOUNDS.clamp(percent))
}

async fn handshake(client: &mut UnixSocketClient) -> anyhow::Result<()> {
    let request_id = RequestId::new();
    client
        .send(&ClientRequest::Handshake {
            request_id: request_id.clone(),
            protocol_version: PROTOCOL_VERSION,
        })
        .await?;

    match wait_for_reply(client, &request_id).await? {
        DaemonMessage::HandshakeAck { accepted: true, .. } => Ok(()),
        DaemonMessage::HandshakeAck {
            rejection_reason, ..
        } => bail!(
            "daemon rejected the connection: {}",
            rejection_reason.unwrap_or_else(|| "no reason given".to_string())
        ),
        other => bail!("unexpected handshake reply: {other:?}"),
    }
}

/// Read messages until the one echoing `request_id` arrives. Unsolicited
/// notices received along the way are printed, not dropped.
async fn wait_for_reply(
    client: &mut UnixSocketClient,
    request_id: &RequestId,
) -> anyhow::Result<DaemonMessage> {
    let deadline = tokio::time::Instant::now() + REPLY_TIMEOUT;
    loop {
        let msg = tokio::time::timeout_at(deadline, client.recv())
            .await
            .context("timed out waiting for the daemon")??;
        match &msg {
            DaemonMessage::Notice { level, message } => {
                eprintln!("[{level:?}] {message}");
            }
            DaemonMessage::HandshakeAck { request_id: id, .. }
            | DaemonMessage::Status { request_id: id, .. }
            | DaemonMessage::Ack { request_id: id }
            | DaemonMessage::Version { request_id: id, .. } => {
                if id == request_id {
                    return Ok(msg);
                }
            }
        }
    }
}

fn print_status(report: &StatusReport) {
    if !report.has_telemetry {
        println!("No telemetry yet; the daemon is still starting up.");
        return;
    }

    println!("Battery:        {}%", report.charge_percent);
    println!(
        "State:          {}",
        if report.force_discharge_active {
            "force discharging"
        } else if report.is_charging {
            "charging"
        } else if report.is_connected && report.charge_percent >= report.effective_limit {
            "held at limit"
        } else if report.is_connected {
            "on external power"
        } else {
            "discharging"
        }
    );
    println!("Charge limit:   {}%", report.effective_limit);
    println!(
        "Adapter:        {}",
        if report.is_connected {
            if report.adapter_description.is_empty() {
                "connected".to_string()
            } else {
                format!("{} ({}W)", report.adapter_description, report.adapter_max_watts)
            }
        } else {
            "disconnected".to_string()
        }
    );
    if report.time_to_full_minutes >= 0 && report.is_charging {
        println!("Time to full:   {} min", report.time_to_full_minutes);
    }
    if report.time_to_empty_minutes >= 0 && !report.is_connected {
        println!("Time to empty:  {} min", report.time_to_empty_minutes);
    }
    println!("Cycles:         {}", report.cycle_count);
    if report.health_percent > 0 {
        println!("Health:         {}%", report.health_percent);
    }
    if report.battery_watts > 0.0 {
        println!("Battery power:  {:.1}W", report.battery_watts);
    }

    let mut features = Vec::new();
    if report.led_control_active {
        features.push("led-control");
    }
    if report.disable_charging_before_sleep_active {
        features.push("disable-charging-before-sleep");
    }
    if report.prevent_display_sleep_active {
        features.push("prevent-display-sleep");
    }
    if report.prevent_system_sleep_active {
        features.push("prevent-system-sleep");
    }
    if report.low_power_mode_enabled {
        features.push("low-power-mode");
    }
    if !features.is_empty() {
        println!("Features:       {}", features.join(", "));
    }
}
