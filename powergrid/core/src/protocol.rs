//! Control API Protocol
//!
//! Requests sent from foreground clients to the daemon and the messages
//! the daemon sends back. Responses echo the request's id; `Notice`
//! messages are unsolicited pushes (auto-cutoff reached, low battery) that
//! any connected client may receive at any time.

use serde::{Deserialize, Serialize};

use crate::rules::ForceDischargeMode;

/// Wire protocol version clients and daemon must agree on.
pub const PROTOCOL_VERSION: u32 = 1;

/// Request identifier, echoed on the matching response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    /// Generate a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("req_{id}"))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Toggleable power features.
///
/// A closed set: the daemon matches exhaustively and logs-and-ignores
/// nothing, so adding a variant is a compile-visible protocol change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerFeature {
    /// Hold a display-sleep-prevention assertion
    PreventDisplaySleep,
    /// Hold a system-sleep-prevention assertion
    PreventSystemSleep,
    /// Forced discharge, plain on/off
    ForceDischarge,
    /// Forced discharge that auto-cuts off at the configured limit
    ForceDischargeAuto,
    /// Daemon-driven accessory LED
    ControlLed,
    /// Disable charging hardware right before system sleep
    DisableChargingBeforeSleep,
    /// OS low-power mode
    LowPowerMode,
}

/// Requests from a client to the daemon.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ClientRequest {
    /// First request on a fresh connection
    Handshake {
        /// Request ID for response matching
        request_id: RequestId,
        /// Protocol version the client speaks
        protocol_version: u32,
    },

    /// Side-effect-free status snapshot
    GetStatus {
        /// Request ID for response matching
        request_id: RequestId,
    },

    /// Set the charge limit for the active session's user
    SetChargeLimit {
        /// Request ID for response matching
        request_id: RequestId,
        /// Requested limit percentage
        limit: u8,
    },

    /// Toggle a power feature
    SetPowerFeature {
        /// Request ID for response matching
        request_id: RequestId,
        /// Which feature to toggle
        feature: PowerFeature,
        /// Desired state
        enable: bool,
    },

    /// Daemon build identity, for client upgrade checks
    GetVersion {
        /// Request ID for response matching
        request_id: RequestId,
    },
}

impl ClientRequest {
    /// The request's id.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::Handshake { request_id, .. }
            | Self::GetStatus { request_id }
            | Self::SetChargeLimit { request_id, .. }
            | Self::SetPowerFeature { request_id, .. }
            | Self::GetVersion { request_id } => request_id,
        }
    }
}

/// Severity of an unsolicited notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    /// Informational (auto-cutoff reached)
    Info,
    /// Needs attention (low battery)
    Warning,
}

/// Messages from the daemon to a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DaemonMessage {
    /// Response to `Handshake`
    HandshakeAck {
        /// Echo of the request id
        request_id: RequestId,
        /// Whether the connection was accepted
        accepted: bool,
        /// Connection ID assigned by the daemon
        connection_id: String,
        /// Reason for rejection (if not accepted)
        rejection_reason: Option<String>,
        /// Protocol version the daemon speaks
        protocol_version: u32,
    },

    /// Response to `GetStatus`
    Status {
        /// Echo of the request id
        request_id: RequestId,
        /// The snapshot
        report: Box<StatusReport>,
    },

    /// Mutation accepted (or silently ignored after validation)
    Ack {
        /// Echo of the request id
        request_id: RequestId,
    },

    /// Response to `GetVersion`
    Version {
        /// Echo of the request id
        request_id: RequestId,
        /// Build identity stamped at compile time
        build_id: String,
    },

    /// Unsolicited user-facing notification
    Notice {
        /// Severity
        level: NoticeLevel,
        /// Human-readable message
        message: String,
    },
}

/// Everything a status view needs, in one consistent read.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Whether telemetry has been received yet; other fields are zeroed
    /// until the first snapshot arrives
    pub has_telemetry: bool,
    /// Battery charge percentage
    pub charge_percent: u8,
    /// Actively charging
    pub is_charging: bool,
    /// Adapter connected
    pub is_connected: bool,
    /// The effective (enforced) charge limit
    pub effective_limit: u8,
    /// Charging hardware switch state
    pub charging_enabled: bool,
    /// Adapter hardware switch state
    pub adapter_enabled: bool,
    /// Forced discharge currently live at the hardware
    pub force_discharge_active: bool,
    /// Selected forced-discharge mode
    pub force_discharge_mode: ForceDischargeMode,
    /// Hardware supports LED control
    pub led_supported: bool,
    /// User enabled daemon LED control
    pub led_control_active: bool,
    /// OS low-power mode reported on
    pub low_power_mode_enabled: bool,
    /// Disable-charging-before-sleep preference active
    pub disable_charging_before_sleep_active: bool,
    /// Display-sleep assertion held
    pub prevent_display_sleep_active: bool,
    /// System-sleep assertion held
    pub prevent_system_sleep_active: bool,
    /// Estimated minutes until full (negative = unknown)
    pub time_to_full_minutes: i32,
    /// Estimated minutes until empty (negative = unknown)
    pub time_to_empty_minutes: i32,
    /// Battery cycle count
    pub cycle_count: u32,
    /// Health as percent of design capacity
    pub health_percent: u8,
    /// Adapter description string
    pub adapter_description: String,
    /// Adapter rated wattage
    pub adapter_max_watts: u32,
    /// Instantaneous battery wattage
    pub battery_watts: f32,
    /// Instantaneous adapter wattage
    pub adapter_watts: f32,
    /// Instantaneous system wattage
    pub system_watts: f32,
}
