//! Forced-Discharge Auto-Cutoff and Low-Battery Rules
//!
//! Edge-triggered rules evaluated against successive telemetry samples.
//!
//! The auto-cutoff rule watches forced discharge in `Auto` mode and fires
//! exactly once when charge crosses from above to at-or-below the cutoff,
//! producing "disable forced discharge and tell the user". Firing consumes
//! the arm state; only re-selecting `Auto` re-arms it. The rule never fires
//! on the very evaluation that entered `Auto` - it needs one observation to
//! establish which side of the cutoff it started on.
//!
//! Low-battery rules are independent per-threshold edge detectors with a
//! hysteresis re-arm band, so charge jitter around a threshold cannot spam
//! notifications.

use serde::{Deserialize, Serialize};

/// Forced-discharge selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForceDischargeMode {
    /// Adapter enabled, no forced discharge
    #[default]
    Off,
    /// Discharge until the user turns it off
    On,
    /// Discharge until the auto-cutoff fires
    Auto,
}

impl ForceDischargeMode {
    /// Whether this mode wants the adapter disabled.
    #[must_use]
    pub fn discharging(self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Compute the cutoff percentage for `Auto` mode.
///
/// Based on the effective (or preferred) limit, clamped to [60, 99] - a
/// 100% limit still cuts off at 99 so the rule can actually fire.
#[must_use]
pub fn auto_cutoff(limit: u8) -> u8 {
    limit.clamp(60, 99)
}

/// Edge detector for the `Auto` forced-discharge cutoff.
#[derive(Debug, Default)]
pub struct AutoCutoffRule {
    armed: bool,
    above_cutoff: bool,
}

impl AutoCutoffRule {
    /// Unarmed rule; arms on the first evaluation after `Auto` is selected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the arm state. Called whenever the mode leaves `Auto`
    /// (including when the rule itself fires).
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Evaluate one sample while in `Auto` mode.
    ///
    /// `discharge_active` is the hardware truth (adapter actually
    /// disabled); the rule only runs while discharge is live. Returns true
    /// exactly once per arm, on the above-to-at-or-below crossing.
    pub fn evaluate(&mut self, discharge_active: bool, charge: u8, cutoff: u8) -> bool {
        if !discharge_active {
            return false;
        }

        let above = charge > cutoff;
        if !self.armed {
            // First observation after selecting Auto: record the starting
            // side, never fire.
            self.armed = true;
            self.above_cutoff = above;
            return false;
        }

        let crossed = self.above_cutoff && !above;
        self.above_cutoff = above;
        if crossed {
            self.armed = false;
        }
        crossed
    }
}

/// One low-battery notification threshold with a hysteresis re-arm band.
#[derive(Debug)]
pub struct LowBatteryRule {
    threshold: u8,
    rearm_above: u8,
    armed: bool,
}

/// The standard pair of low-battery rules: 20% (re-arm at 22) and
/// 10% (re-arm at 12).
#[must_use]
pub fn standard_low_battery_rules() -> [LowBatteryRule; 2] {
    [LowBatteryRule::new(20, 22), LowBatteryRule::new(10, 12)]
}

impl LowBatteryRule {
    /// Rule that fires at `threshold` and re-arms once charge reaches
    /// `rearm_above`. Starts armed.
    #[must_use]
    pub fn new(threshold: u8, rearm_above: u8) -> Self {
        Self {
            threshold,
            rearm_above,
            armed: true,
        }
    }

    /// This rule's threshold percentage.
    #[must_use]
    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Evaluate one sample. `eligible` is the caller's gate: discharging,
    /// notifications enabled, and not paused at the limit. Re-arming from
    /// a recovered charge level happens regardless of eligibility.
    pub fn evaluate(&mut self, charge: u8, eligible: bool) -> bool {
        if charge >= self.rearm_above {
            self.armed = true;
        }
        if !eligible || !self.armed || charge > self.threshold {
            return false;
        }
        self.armed = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_clamps_to_band() {
        assert_eq!(auto_cutoff(80), 80);
        assert_eq!(auto_cutoff(40), 60);
        assert_eq!(auto_cutoff(100), 99);
    }

    #[test]
    fn auto_cutoff_fires_once_on_crossing() {
        let mut rule = AutoCutoffRule::new();
        let cutoff = 80;

        // Selected Auto at 90, discharging down to the cutoff.
        assert!(!rule.evaluate(true, 90, cutoff));
        assert!(!rule.evaluate(true, 85, cutoff));
        assert!(rule.evaluate(true, 80, cutoff));
        // Consumed: staying below cannot re-fire.
        assert!(!rule.evaluate(true, 79, cutoff));
        assert!(!rule.evaluate(true, 78, cutoff));
    }

    #[test]
    fn auto_cutoff_rearms_on_reselect() {
        let mut rule = AutoCutoffRule::new();
        assert!(!rule.evaluate(true, 90, 80));
        assert!(rule.evaluate(true, 80, 80));

        // User re-selects Auto while above the cutoff again.
        rule.disarm();
        assert!(!rule.evaluate(true, 85, 80));
        assert!(rule.evaluate(true, 79, 80));
    }

    #[test]
    fn auto_cutoff_never_fires_on_entry_below_cutoff() {
        let mut rule = AutoCutoffRule::new();
        // Auto selected when already at/below the cutoff: no crossing, no fire.
        assert!(!rule.evaluate(true, 75, 80));
        assert!(!rule.evaluate(true, 70, 80));
    }

    #[test]
    fn auto_cutoff_requires_active_discharge() {
        let mut rule = AutoCutoffRule::new();
        assert!(!rule.evaluate(false, 90, 80));
        assert!(!rule.evaluate(false, 75, 80));
    }

    #[test]
    fn low_battery_fires_once_per_edge() {
        let mut rule = LowBatteryRule::new(20, 22);
        let fired: Vec<bool> = [25, 21, 19, 18]
            .iter()
            .map(|&c| rule.evaluate(c, true))
            .collect();
        assert_eq!(fired, vec![false, false, true, false]);
    }

    #[test]
    fn low_battery_rearms_above_band() {
        let mut rule = LowBatteryRule::new(20, 22);
        assert!(rule.evaluate(19, true));
        // 25 >= 22 resets the debounce, so the next dip fires again.
        assert!(!rule.evaluate(25, true));
        assert!(rule.evaluate(19, true));
    }

    #[test]
    fn low_battery_within_band_does_not_rearm() {
        let mut rule = LowBatteryRule::new(20, 22);
        assert!(rule.evaluate(20, true));
        // 21 is inside the hysteresis band; dropping back must not re-fire.
        assert!(!rule.evaluate(21, true));
        assert!(!rule.evaluate(19, true));
    }

    #[test]
    fn low_battery_ineligible_samples_never_fire() {
        let mut rule = LowBatteryRule::new(10, 12);
        assert!(!rule.evaluate(9, false));
        // Eligibility restored while still below: fires now.
        assert!(rule.evaluate(9, true));
    }
}
