//! Sysfs Power Backend
//!
//! `PowerSource` implementation backed by `/sys/class/power_supply` plus
//! a few platform knobs. Telemetry reads are best effort per attribute:
//! a missing file zeroes its field instead of failing the whole snapshot,
//! because supply drivers expose wildly different attribute sets.
//!
//! Charging control uses `charge_behaviour` ("auto" / "inhibit-charge"),
//! forced discharge uses the same file's "force-discharge" value, and
//! low-power mode maps to the ACPI platform profile. Hardware without
//! these knobs reports the corresponding command as unsupported.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use powergrid_core::led::LedTarget;
use powergrid_core::telemetry::{PowerSource, SleepAssertion, TelemetrySnapshot};

const POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";
const PLATFORM_PROFILE: &str = "/sys/firmware/acpi/platform_profile";

const BEHAVIOUR_AUTO: &str = "auto";
const BEHAVIOUR_INHIBIT: &str = "inhibit-charge";
const BEHAVIOUR_FORCE_DISCHARGE: &str = "force-discharge";

/// Power backend reading and driving sysfs attributes.
pub struct SysfsPowerSource {
    battery: Option<PathBuf>,
    mains: Option<PathBuf>,
    led: Option<PathBuf>,
}

impl SysfsPowerSource {
    /// Discover battery and mains supplies under the default sysfs root.
    pub fn discover(led: Option<PathBuf>) -> anyhow::Result<Self> {
        Self::discover_at(POWER_SUPPLY_ROOT, led)
    }

    /// Discover supplies under `root`, optionally driving an LED device
    /// (a directory under `/sys/class/leds`).
    pub fn discover_at(
        root: impl AsRef<Path>,
        led: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let root = root.as_ref();
        let mut battery = None;
        let mut mains = None;

        let entries = fs::read_dir(root)
            .with_context(|| format!("reading power supply directory {}", root.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            match read_trimmed(&path.join("type")).as_deref() {
                Some("Battery") if battery.is_none() => battery = Some(path),
                Some("Mains") | Some("USB") if mains.is_none() => mains = Some(path),
                _ => {}
            }
        }

        if battery.is_none() {
            tracing::warn!(root = %root.display(), "No battery supply found");
        }
        if let Some(led) = &led {
            if !led.is_dir() {
                anyhow::bail!("LED device {} does not exist", led.display());
            }
        }

        Ok(Self { battery, mains, led })
    }

    fn battery(&self) -> anyhow::Result<&Path> {
        self.battery
            .as_deref()
            .context("no battery supply available")
    }

    fn battery_attr(&self, name: &str) -> Option<String> {
        read_trimmed(&self.battery.as_ref()?.join(name))
    }

    fn mains_attr(&self, name: &str) -> Option<String> {
        read_trimmed(&self.mains.as_ref()?.join(name))
    }

    fn battery_num<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.battery_attr(name)?.parse().ok()
    }

    fn write_behaviour(&self, value: &str) -> anyhow::Result<()> {
        let path = self.battery()?.join("charge_behaviour");
        if !path.is_file() {
            anyhow::bail!("charge_behaviour not supported by this battery driver");
        }
        fs::write(&path, value)
            .with_context(|| format!("writing {value} to {}", path.display()))
    }

    fn read_behaviour(&self) -> Option<String> {
        // The file lists all supported values with the active one in
        // brackets, e.g. "[auto] inhibit-charge force-discharge".
        let raw = self.battery_attr("charge_behaviour")?;
        let start = raw.find('[')?;
        let end = raw.find(']')?;
        Some(raw[start + 1..end].to_string())
    }
}

impl PowerSource for SysfsPowerSource {
    fn snapshot(&self) -> anyhow::Result<TelemetrySnapshot> {
        self.battery()?;

        let status = self.battery_attr("status").unwrap_or_default();
        let behaviour = self.read_behaviour();
        let connected = self.mains_attr("online").as_deref() == Some("1");

        let charge_full: f64 = self.battery_num("charge_full").unwrap_or(0.0);
        let charge_full_design: f64 = self.battery_num("charge_full_design").unwrap_or(0.0);
        let health_percent = if charge_full_design > 0.0 {
            ((charge_full / charge_full_design) * 100.0).round().min(100.0) as u8
        } else {
            0
        };

        // power_now is microwatts; sign conventions vary by driver, so
        // report magnitude.
        let battery_watts = self
            .battery_num::<f64>("power_now")
            .map_or(0.0, |uw| (uw / 1_000_000.0).abs() as f32);

        Ok(TelemetrySnapshot {
            charge_percent: self.battery_num("capacity").unwrap_or(0),
            is_charging: status == "Charging",
            is_connected: connected,
            charging_enabled: behaviour.as_deref() != Some(BEHAVIOUR_INHIBIT),
            adapter_enabled: behaviour.as_deref() != Some(BEHAVIOUR_FORCE_DISCHARGE),
            adapter_max_watts: self
                .mains_attr("input_power_limit")
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(0, |uw| (uw / 1_000_000) as u32),
            adapter_description: self.mains_attr("model_name").unwrap_or_default(),
            cycle_count: self.battery_num("cycle_count").unwrap_or(0),
            health_percent,
            battery_watts,
            adapter_watts: 0.0,
            system_watts: 0.0,
            time_to_full_minutes: self
                .battery_num::<i64>("time_to_full_now")
                .map_or(-1, |secs| (secs / 60) as i32),
            time_to_empty_minutes: self
                .battery_num::<i64>("time_to_empty_now")
                .map_or(-1, |secs| (secs / 60) as i32),
        })
    }

    fn set_charging_enabled(&self, enable: bool) -> anyhow::Result<()> {
        // Never clobber an active force-discharge with a charging toggle.
        if !enable || self.read_behaviour().as_deref() != Some(BEHAVIOUR_FORCE_DISCHARGE) {
            self.write_behaviour(if enable {
                BEHAVIOUR_AUTO
            } else {
                BEHAVIOUR_INHIBIT
            })?;
        }
        Ok(())
    }

    fn set_adapter_enabled(&self, enable: bool) -> anyhow::Result<()> {
        self.write_behaviour(if enable {
            BEHAVIOUR_AUTO
        } else {
            BEHAVIOUR_FORCE_DISCHARGE
        })
    }

    fn led_supported(&self) -> bool {
        self.led.is_some()
    }

    fn set_led(&self, target: LedTarget) -> anyhow::Result<()> {
        let led = self.led.as_ref().context("no LED device configured")?;

        // Map targets onto a single brightness/trigger LED. Alarm blinks
        // via the kernel timer trigger; system-controlled restores the
        // firmware default trigger.
        let (trigger, brightness) = match target {
            LedTarget::Amber | LedTarget::Green => ("none", Some("1")),
            LedTarget::Off => ("none", Some("0")),
            LedTarget::LowBatteryAlarm => ("timer", None),
            LedTarget::SystemControlled => ("default-on", None),
        };
        fs::write(led.join("trigger"), trigger)
            .with_context(|| format!("setting LED trigger to {trigger}"))?;
        if let Some(brightness) = brightness {
            fs::write(led.join("brightness"), brightness)
                .with_context(|| format!("setting LED brightness to {brightness}"))?;
        }
        Ok(())
    }

    fn set_sleep_assertion(&self, kind: SleepAssertion, active: bool) -> anyhow::Result<()> {
        // Sleep inhibition is owned by the session manager on this
        // platform; track the request so status reporting stays honest.
        tracing::debug!(kind = ?kind, active, "Sleep assertion request (advisory only)");
        Ok(())
    }

    fn allow_all_sleep(&self) -> anyhow::Result<()> {
        tracing::debug!("Dropping sleep assertions (advisory only)");
        Ok(())
    }

    fn set_low_power_mode(&self, enable: bool) -> anyhow::Result<()> {
        let value = if enable { "low-power" } else { "balanced" };
        fs::write(PLATFORM_PROFILE, value)
            .with_context(|| format!("setting platform profile to {value}"))
    }

    fn low_power_mode_enabled(&self) -> bool {
        read_trimmed(Path::new(PLATFORM_PROFILE)).as_deref() == Some("low-power")
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}
