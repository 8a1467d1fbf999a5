//! Accessory Indicator (Status LED) Control
//!
//! Maps system state to an LED target through a fixed priority order and
//! applies it idempotently: the hardware is written only when the computed
//! target differs from the last one applied. Releasing control (feature
//! disabled, daemon startup, no-session entry) always hands the LED back
//! to the system unconditionally, as the fail-safe default.

use serde::{Deserialize, Serialize};

use crate::telemetry::{PowerSource, TelemetrySnapshot};

/// Hardware indicator states the daemon can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedTarget {
    /// Charging in progress
    Amber,
    /// Full, or paused at the configured limit
    Green,
    /// No indication
    Off,
    /// Low-battery alarm pattern
    LowBatteryAlarm,
    /// Firmware-controlled default behavior
    SystemControlled,
}

/// Compute the LED target for the given state.
///
/// Priority order, first match wins:
/// 1. charge <= 10% -> alarm, overriding everything else
/// 2. forced discharge active -> off
/// 3. unlimited (limit >= 100): green when essentially full, amber while
///    charging, otherwise off
/// 4. limited: amber only while actually charging below the limit,
///    otherwise green (paused at/above the limit reads as "full")
#[must_use]
pub fn compute_target(snapshot: &TelemetrySnapshot, limit: u8, force_discharge: bool) -> LedTarget {
    let charge = snapshot.charge_percent;

    if charge <= 10 {
        return LedTarget::LowBatteryAlarm;
    }
    if force_discharge {
        return LedTarget::Off;
    }
    if limit >= 100 {
        if snapshot.is_connected && charge >= 99 {
            LedTarget::Green
        } else if snapshot.is_charging {
            LedTarget::Amber
        } else {
            LedTarget::Off
        }
    } else if snapshot.is_charging && snapshot.charging_enabled && charge < limit {
        LedTarget::Amber
    } else {
        LedTarget::Green
    }
}

/// Idempotent applier tracking the last target written to hardware.
#[derive(Debug, Default)]
pub struct LedController {
    last_applied: Option<LedTarget>,
}

impl LedController {
    /// Fresh controller with no known hardware state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The last target successfully written, if any.
    #[must_use]
    pub fn last_applied(&self) -> Option<LedTarget> {
        self.last_applied
    }

    /// Apply `target` if it differs from the last applied state.
    ///
    /// Only runs when the hardware supports LED control, the user enabled
    /// the feature, and an adapter is present; callers gate on those.
    /// Write failures are logged and leave the tracking state unchanged so
    /// the next evaluation retries.
    pub fn apply(&mut self, source: &dyn PowerSource, target: LedTarget) {
        if self.last_applied == Some(target) {
            return;
        }
        match source.set_led(target) {
            Ok(()) => {
                tracing::info!(target = ?target, "Status LED updated");
                self.last_applied = Some(target);
            }
            Err(e) => {
                tracing::error!(target = ?target, error = %e, "Failed to set status LED");
            }
        }
    }

    /// Return the LED to system control unconditionally.
    pub fn release(&mut self, source: &dyn PowerSource) {
        match source.set_led(LedTarget::SystemControlled) {
            Ok(()) => {
                tracing::info!("Status LED returned to system control");
                self.last_applied = Some(LedTarget::SystemControlled);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not return status LED to system control");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(charge: u8, charging: bool, connected: bool, hw_enabled: bool) -> TelemetrySnapshot {
        TelemetrySnapshot {
            charge_percent: charge,
            is_charging: charging,
            is_connected: connected,
            charging_enabled: hw_enabled,
            adapter_enabled: true,
            adapter_max_watts: 96,
            ..TelemetrySnapshot::default()
        }
    }

    #[test]
    fn low_battery_alarm_overrides_forced_discharge() {
        let snap = snapshot(5, false, true, false);
        assert_eq!(compute_target(&snap, 80, true), LedTarget::LowBatteryAlarm);
    }

    #[test]
    fn forced_discharge_turns_led_off() {
        let snap = snapshot(50, false, true, false);
        assert_eq!(compute_target(&snap, 80, true), LedTarget::Off);
    }

    #[test]
    fn unlimited_full_is_green() {
        let snap = snapshot(99, false, true, true);
        assert_eq!(compute_target(&snap, 100, false), LedTarget::Green);
    }

    #[test]
    fn unlimited_charging_is_amber() {
        let snap = snapshot(50, true, true, true);
        assert_eq!(compute_target(&snap, 100, false), LedTarget::Amber);
    }

    #[test]
    fn unlimited_idle_is_off() {
        let snap = snapshot(50, false, true, true);
        assert_eq!(compute_target(&snap, 100, false), LedTarget::Off);
    }

    #[test]
    fn limited_below_limit_charging_is_amber() {
        let snap = snapshot(70, true, true, true);
        assert_eq!(compute_target(&snap, 80, false), LedTarget::Amber);
    }

    #[test]
    fn limited_paused_at_limit_is_green() {
        // Charging hardware disabled by the limiter counts as "full".
        let snap = snapshot(80, false, true, false);
        assert_eq!(compute_target(&snap, 80, false), LedTarget::Green);
    }
}
