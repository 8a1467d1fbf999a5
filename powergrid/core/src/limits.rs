//! Charge Limit Resolution
//!
//! Computes the single effective charge limit from the user override, the
//! system default, and the built-in default. A value of `0` means "unset"
//! and is skipped in precedence; zero is never a legal limit.
//!
//! Two clamp bounds exist: the daemon accepts the full hardware-safe range,
//! while UI clients clamp to a narrower band before submitting. Both are
//! expressed as [`ClampBounds`] so the resolver stays a pure function.

/// Built-in charge limit used when neither user nor system configured one.
pub const BUILTIN_DEFAULT_LIMIT: u8 = 80;

/// Inclusive clamp range for a charge limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClampBounds {
    /// Lowest accepted limit
    pub min: u8,
    /// Highest accepted limit
    pub max: u8,
}

/// Range enforced by the daemon itself.
pub const DAEMON_BOUNDS: ClampBounds = ClampBounds { min: 40, max: 100 };

/// Narrower range that UI-facing clients clamp to.
pub const UI_BOUNDS: ClampBounds = ClampBounds { min: 60, max: 100 };

impl ClampBounds {
    /// Clamp a limit into this range. `0` ("unset") is passed through
    /// untouched so precedence logic can still recognize it.
    #[must_use]
    pub fn clamp(&self, limit: u8) -> u8 {
        if limit == 0 {
            return 0;
        }
        limit.clamp(self.min, self.max)
    }

    /// Whether a limit lies inside this range (exclusive of the 0 sentinel).
    #[must_use]
    pub fn contains(&self, limit: u8) -> bool {
        limit >= self.min && limit <= self.max
    }
}

/// Resolve the effective charge limit.
///
/// Precedence: a positive `user` limit wins, else a positive `system`
/// limit, else `builtin`. Each non-zero input is clamped to `bounds`
/// before comparison.
#[must_use]
pub fn resolve(user: u8, system: u8, builtin: u8, bounds: ClampBounds) -> u8 {
    if user > 0 {
        return bounds.clamp(user);
    }
    if system > 0 {
        return bounds.clamp(system);
    }
    bounds.clamp(builtin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn user_overrides_system() {
        assert_eq!(resolve(75, 90, 80, DAEMON_BOUNDS), 75);
    }

    #[test]
    fn system_used_when_no_user() {
        assert_eq!(resolve(0, 90, 80, DAEMON_BOUNDS), 90);
    }

    #[test]
    fn default_used_when_none_set() {
        assert_eq!(resolve(0, 0, 80, DAEMON_BOUNDS), 80);
    }

    #[test]
    fn clamps_low_values() {
        assert_eq!(resolve(10, 0, 0, DAEMON_BOUNDS), 40);
        assert_eq!(resolve(10, 0, 0, UI_BOUNDS), 60);
    }

    #[test]
    fn clamps_high_values() {
        assert_eq!(resolve(150, 0, 0, DAEMON_BOUNDS), 100);
    }

    #[test]
    fn zero_is_unset_not_clamped() {
        assert_eq!(DAEMON_BOUNDS.clamp(0), 0);
        // A zero system limit must not shadow the builtin default.
        assert_eq!(resolve(0, 0, 80, UI_BOUNDS), 80);
    }

    #[test]
    fn result_always_within_bounds() {
        for user in [0u8, 1, 39, 40, 80, 100, 255] {
            for system in [0u8, 1, 59, 90, 200] {
                for builtin in [40u8, 80, 100] {
                    let got = resolve(user, system, builtin, DAEMON_BOUNDS);
                    assert!(DAEMON_BOUNDS.contains(got), "resolve({user},{system},{builtin}) = {got}");
                }
            }
        }
    }
}
