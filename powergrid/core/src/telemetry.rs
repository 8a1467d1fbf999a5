//! Telemetry Types and the Hardware Boundary
//!
//! The control core never talks to hardware directly. Everything it needs
//! goes through [`PowerSource`]: a pull interface (fetch the current
//! [`TelemetrySnapshot`]) plus command methods (charging toggle, adapter
//! toggle, LED writes, sleep assertions). The push side is a stream of
//! [`PowerEvent`]s that the daemon feeds into the engine.
//!
//! Hardware calls are expected to be fast and bounded; the engine invokes
//! them inline while holding its state lock.

use serde::{Deserialize, Serialize};

use crate::led::LedTarget;

/// Read-only snapshot of the battery and adapter state.
///
/// Produced by the external telemetry collaborator; the core only caches
/// the most recent one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Battery charge percentage (0-100)
    pub charge_percent: u8,
    /// Whether the battery is actively charging
    pub is_charging: bool,
    /// Whether an external power adapter is connected
    pub is_connected: bool,
    /// Whether the charging hardware switch is currently enabled
    pub charging_enabled: bool,
    /// Whether the adapter hardware switch is currently enabled
    pub adapter_enabled: bool,
    /// Adapter's rated maximum wattage (0 when absent)
    pub adapter_max_watts: u32,
    /// Human-readable adapter description
    #[serde(default)]
    pub adapter_description: String,
    /// Battery cycle count
    #[serde(default)]
    pub cycle_count: u32,
    /// Health as percent of design capacity
    #[serde(default)]
    pub health_percent: u8,
    /// Instantaneous battery power draw in watts
    #[serde(default)]
    pub battery_watts: f32,
    /// Instantaneous adapter power delivery in watts
    #[serde(default)]
    pub adapter_watts: f32,
    /// Instantaneous whole-system power draw in watts
    #[serde(default)]
    pub system_watts: f32,
    /// Estimated minutes until full (negative = unknown)
    #[serde(default)]
    pub time_to_full_minutes: i32,
    /// Estimated minutes until empty (negative = unknown)
    #[serde(default)]
    pub time_to_empty_minutes: i32,
}

impl TelemetrySnapshot {
    /// Adapter presence heuristic: connected external power or a rated
    /// wattage implies a real adapter. Some backends report only one of
    /// the two.
    #[must_use]
    pub fn adapter_present(&self) -> bool {
        self.is_connected || self.adapter_max_watts > 0
    }
}

/// Events pushed from the hardware/OS side into the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum PowerEvent {
    /// Battery or adapter state changed. Carries the snapshot when the
    /// producer already has one, otherwise the engine fetches fresh.
    BatteryUpdate(Option<TelemetrySnapshot>),
    /// The system is about to suspend
    WillSleep,
    /// The system resumed from suspend
    DidWake,
}

/// Sleep-prevention assertion kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepAssertion {
    /// Keep the display awake
    PreventDisplaySleep,
    /// Keep the whole system awake
    PreventSystemSleep,
}

/// The hardware/OS control boundary.
///
/// Implementations are external collaborators (SMC, sysfs, a mock in
/// tests). Command failures are transient by contract: the engine logs
/// them and relies on the next evaluation cycle to retry.
pub trait PowerSource: Send + Sync {
    /// Fetch the current telemetry snapshot.
    fn snapshot(&self) -> anyhow::Result<TelemetrySnapshot>;

    /// Enable or disable the charging hardware.
    fn set_charging_enabled(&self, enable: bool) -> anyhow::Result<()>;

    /// Enable or disable adapter power delivery (disable = forced discharge).
    fn set_adapter_enabled(&self, enable: bool) -> anyhow::Result<()>;

    /// Whether this hardware exposes a controllable accessory LED.
    fn led_supported(&self) -> bool;

    /// Write the accessory LED state.
    fn set_led(&self, target: LedTarget) -> anyhow::Result<()>;

    /// Create or release a sleep-prevention assertion.
    fn set_sleep_assertion(&self, kind: SleepAssertion, active: bool) -> anyhow::Result<()>;

    /// Drop every assertion this process holds.
    fn allow_all_sleep(&self) -> anyhow::Result<()>;

    /// Toggle the OS low-power mode.
    fn set_low_power_mode(&self, enable: bool) -> anyhow::Result<()>;

    /// Whether the OS low-power mode is currently on. Best effort; returns
    /// false when the platform cannot report it.
    fn low_power_mode_enabled(&self) -> bool;
}
