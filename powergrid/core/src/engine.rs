//! The Control Engine
//!
//! Single owner of all mutable daemon state: the cached telemetry
//! snapshot, the active session, feature flags, the forced-discharge
//! mode, and the notification rules. The daemon wraps one engine in an
//! `Arc<Mutex<_>>` and funnels every input through it: power events,
//! session transitions, the periodic tick, and client requests. All
//! methods are synchronous; hardware commands are fast and run inline
//! under the lock, so every decision sees a consistent view.
//!
//! Charging is governed by a level-triggered rule re-evaluated on every
//! input: at or above the effective limit the charging hardware is
//! switched off, below it switched on. There is no hysteresis band; the
//! hardware write is the idempotent part (commands are skipped when the
//! snapshot already shows the desired state).

use tokio::sync::mpsc;

use crate::config::ConfigStore;
use crate::led::{self, LedController};
use crate::limits::{self, DAEMON_BOUNDS};
use crate::protocol::{
    ClientRequest, DaemonMessage, NoticeLevel, PowerFeature, StatusReport, PROTOCOL_VERSION,
};
use crate::rules::{
    auto_cutoff, standard_low_battery_rules, AutoCutoffRule, ForceDischargeMode, LowBatteryRule,
};
use crate::session::{Session, SessionChange, SessionTracker};
use crate::telemetry::{PowerEvent, PowerSource, SleepAssertion, TelemetrySnapshot};
use crate::transport::ConnectionId;

const NOTICE_CHANNEL_CAPACITY: usize = 100;

/// Static engine configuration, fixed at construction.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Limit used when neither user nor system configured one
    pub builtin_limit: u8,
    /// Build identity reported to clients
    pub build_id: String,
    /// Whether low-battery notices are emitted at all
    pub low_battery_notify: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            builtin_limit: limits::BUILTIN_DEFAULT_LIMIT,
            build_id: "dev".to_string(),
            low_battery_notify: true,
        }
    }
}

/// Runtime feature toggles. Session-scoped ones are reloaded from the
/// user's config on sign-in and reset to safe defaults on sign-out.
#[derive(Clone, Copy, Debug, Default)]
struct FeatureFlags {
    control_led: bool,
    disable_charging_before_sleep: bool,
    prevent_display_sleep: bool,
    prevent_system_sleep: bool,
}

/// The daemon's decision core.
pub struct PowerEngine<P: PowerSource> {
    source: P,
    store: ConfigStore,
    config: EngineConfig,
    session: SessionTracker,
    flags: FeatureFlags,
    force_discharge: ForceDischargeMode,
    last_snapshot: Option<TelemetrySnapshot>,
    led: LedController,
    cutoff: AutoCutoffRule,
    low_battery: [LowBatteryRule; 2],
    notice_tx: mpsc::Sender<DaemonMessage>,
}

impl<P: PowerSource> PowerEngine<P> {
    /// Build an engine and the receiving end of its notice stream. The
    /// daemon forwards received notices to every connected client.
    pub fn new(
        source: P,
        store: ConfigStore,
        config: EngineConfig,
    ) -> (Self, mpsc::Receiver<DaemonMessage>) {
        let (notice_tx, notice_rx) = mpsc::channel(NOTICE_CHANNEL_CAPACITY);
        let engine = Self {
            source,
            store,
            config,
            session: SessionTracker::new(),
            flags: FeatureFlags::default(),
            force_discharge: ForceDischargeMode::Off,
            last_snapshot: None,
            led: LedController::new(),
            cutoff: AutoCutoffRule::new(),
            low_battery: standard_low_battery_rules(),
            notice_tx,
        };
        (engine, notice_rx)
    }

    /// One-time startup: seed the system config if absent, hand the LED
    /// back to the system (a previous crash may have left it driven), and
    /// run a first evaluation.
    pub fn start(&mut self) -> anyhow::Result<()> {
        self.store.ensure_system_config(self.config.builtin_limit)?;
        if self.source.led_supported() {
            self.led.release(&self.source);
        }
        self.evaluate(None);
        tracing::info!(
            effective_limit = self.effective_limit(),
            "Engine started"
        );
        Ok(())
    }

    /// The effective charge limit right now, resolved from the active
    /// session's config, the system config, and the built-in default.
    #[must_use]
    pub fn effective_limit(&self) -> u8 {
        let user = match self.session.current() {
            Some(session) => self.store.read_user(session.uid).charge_limit,
            None => 0,
        };
        let system = self.store.read_system().charge_limit;
        limits::resolve(user, system, self.config.builtin_limit, DAEMON_BOUNDS)
    }

    /// Feed one power event.
    pub fn handle_power_event(&mut self, event: PowerEvent) {
        match event {
            PowerEvent::BatteryUpdate(snapshot) => self.evaluate(snapshot),
            PowerEvent::WillSleep => self.handle_sleep(),
            PowerEvent::DidWake => {
                tracing::info!("System woke; re-evaluating");
                self.reapply_sleep_assertions();
                self.evaluate(None);
            }
        }
    }

    /// Feed a freshly observed console identity (from the watcher or the
    /// poll fallback). Transitions reset session-scoped state.
    pub fn handle_session_observation(&mut self, now: Option<Session>) {
        let Some(change) = self.session.observe(now) else {
            return;
        };
        match change {
            SessionChange::SignedOut => {
                tracing::info!("Console returned to login screen; applying safe defaults");
                self.enter_no_session();
            }
            SessionChange::SignedIn(session) => {
                tracing::info!(uid = session.uid, user = %session.username, "Console user signed in");
                // Transient state never crosses a user boundary.
                self.clear_transient_state();
                let cfg = self.store.read_user(session.uid);
                self.flags.control_led = cfg.control_led;
                self.flags.disable_charging_before_sleep = cfg.disable_charging_before_sleep;
                if !self.flags.control_led && self.source.led_supported() {
                    self.led.release(&self.source);
                }
            }
        }
        self.evaluate(None);
    }

    /// The periodic safety tick: re-read telemetry and re-apply.
    pub fn tick(&mut self) {
        self.evaluate(None);
    }

    /// Handle one client request and produce its response.
    pub fn handle_request(
        &mut self,
        conn_id: &ConnectionId,
        request: ClientRequest,
    ) -> DaemonMessage {
        match request {
            ClientRequest::Handshake {
                request_id,
                protocol_version,
            } => {
                let accepted = protocol_version == PROTOCOL_VERSION;
                if !accepted {
                    tracing::warn!(
                        conn_id = %conn_id,
                        client_version = protocol_version,
                        "Rejecting client with mismatched protocol version"
                    );
                }
                DaemonMessage::HandshakeAck {
                    request_id,
                    accepted,
                    connection_id: conn_id.to_string(),
                    rejection_reason: (!accepted).then(|| {
                        format!("protocol version {protocol_version} unsupported (daemon speaks {PROTOCOL_VERSION})")
                    }),
                    protocol_version: PROTOCOL_VERSION,
                }
            }

            ClientRequest::GetStatus { request_id } => DaemonMessage::Status {
                request_id,
                report: Box::new(self.status_report()),
            },

            ClientRequest::SetChargeLimit { request_id, limit } => {
                self.set_charge_limit(limit);
                DaemonMessage::Ack { request_id }
            }

            ClientRequest::SetPowerFeature {
                request_id,
                feature,
                enable,
            } => {
                self.set_power_feature(feature, enable);
                DaemonMessage::Ack { request_id }
            }

            ClientRequest::GetVersion { request_id } => DaemonMessage::Version {
                request_id,
                build_id: self.config.build_id.clone(),
            },
        }
    }

    /// Build a consistent status snapshot for clients.
    #[must_use]
    pub fn status_report(&self) -> StatusReport {
        let mut report = StatusReport {
            has_telemetry: self.last_snapshot.is_some(),
            effective_limit: self.effective_limit(),
            force_discharge_mode: self.force_discharge,
            force_discharge_active: self.force_discharge.discharging(),
            led_supported: self.source.led_supported(),
            led_control_active: self.flags.control_led,
            low_power_mode_enabled: self.source.low_power_mode_enabled(),
            disable_charging_before_sleep_active: self.flags.disable_charging_before_sleep,
            prevent_display_sleep_active: self.flags.prevent_display_sleep,
            prevent_system_sleep_active: self.flags.prevent_system_sleep,
            ..StatusReport::default()
        };
        if let Some(snap) = &self.last_snapshot {
            report.charge_percent = snap.charge_percent;
            report.is_charging = snap.is_charging;
            report.is_connected = snap.is_connected;
            report.charging_enabled = snap.charging_enabled;
            report.adapter_enabled = snap.adapter_enabled;
            report.time_to_full_minutes = snap.time_to_full_minutes;
            report.time_to_empty_minutes = snap.time_to_empty_minutes;
            report.cycle_count = snap.cycle_count;
            report.health_percent = snap.health_percent;
            report.adapter_description = snap.adapter_description.clone();
            report.adapter_max_watts = snap.adapter_max_watts;
            report.battery_watts = snap.battery_watts;
            report.adapter_watts = snap.adapter_watts;
            report.system_watts = snap.system_watts;
        }
        report
    }

    /// Disable charging ahead of system sleep when the preference is on,
    /// so the battery does not creep past the limit while suspended.
    fn handle_sleep(&mut self) {
        if !self.flags.disable_charging_before_sleep {
            return;
        }
        tracing::info!("Disabling charging before sleep");
        if let Err(e) = self.source.set_charging_enabled(false) {
            tracing::error!(error = %e, "Failed to disable charging before sleep");
        } else if let Some(snap) = &mut self.last_snapshot {
            snap.charging_enabled = false;
        }
    }

    /// The evaluation pass: refresh telemetry, enforce forced discharge
    /// and the charging rule, drive the LED, run notification rules.
    fn evaluate(&mut self, snapshot: Option<TelemetrySnapshot>) {
        let mut snap = match snapshot {
            Some(s) => s,
            None => match self.source.snapshot() {
                Ok(s) => s,
                Err(e) => {
                    // Keep the previous snapshot and hardware state; the
                    // next tick retries.
                    tracing::warn!(error = %e, "Telemetry read failed; skipping evaluation");
                    return;
                }
            },
        };

        let limit = self.effective_limit();
        let charge = snap.charge_percent;

        self.enforce_force_discharge(&mut snap, limit);

        if !self.force_discharge.discharging() {
            // Level-triggered charging rule. Both directions are checked
            // every pass so a missed event cannot strand the switch.
            if charge >= limit && snap.charging_enabled {
                tracing::info!(charge, limit, "Limit reached; disabling charging");
                if let Err(e) = self.source.set_charging_enabled(false) {
                    tracing::error!(error = %e, "Failed to disable charging");
                } else {
                    snap.charging_enabled = false;
                }
            } else if charge < limit && !snap.charging_enabled {
                tracing::info!(charge, limit, "Below limit; enabling charging");
                if let Err(e) = self.source.set_charging_enabled(true) {
                    tracing::error!(error = %e, "Failed to enable charging");
                } else {
                    snap.charging_enabled = true;
                }
            }
        }

        if self.source.led_supported() && self.flags.control_led && snap.adapter_present() {
            let target = led::compute_target(&snap, limit, self.force_discharge.discharging());
            self.led.apply(&self.source, target);
        }

        self.evaluate_low_battery(&snap, limit);
        self.last_snapshot = Some(snap);
    }

    /// Keep the adapter switch consistent with the selected mode, and run
    /// the auto-cutoff rule while in `Auto`.
    fn enforce_force_discharge(&mut self, snap: &mut TelemetrySnapshot, limit: u8) {
        if !self.force_discharge.discharging() {
            return;
        }

        if !snap.adapter_present() {
            // Unplugging ends forced discharge; the battery is already
            // draining on its own.
            tracing::info!("Adapter removed; ending forced discharge");
            self.set_force_discharge_mode(ForceDischargeMode::Off, snap);
            return;
        }

        if snap.adapter_enabled {
            if let Err(e) = self.source.set_adapter_enabled(false) {
                tracing::error!(error = %e, "Failed to disable adapter for forced discharge");
                return;
            }
            snap.adapter_enabled = false;
        }

        if self.force_discharge == ForceDischargeMode::Auto {
            let cutoff = auto_cutoff(limit);
            if self.cutoff.evaluate(true, snap.charge_percent, cutoff) {
                tracing::info!(charge = snap.charge_percent, cutoff, "Auto cutoff reached");
                self.set_force_discharge_mode(ForceDischargeMode::Off, snap);
                self.notify(
                    NoticeLevel::Info,
                    format!("Forced discharge stopped at {}%", snap.charge_percent),
                );
            }
        }
    }

    fn evaluate_low_battery(&mut self, snap: &TelemetrySnapshot, limit: u8) {
        // Paused at the limit while plugged in is an intentional steady
        // state, not a draining battery.
        let paused_at_limit = snap.is_connected && snap.charge_percent >= limit;
        let eligible = self.config.low_battery_notify && !snap.is_charging && !paused_at_limit;

        let mut fired = false;
        for rule in &mut self.low_battery {
            if rule.evaluate(snap.charge_percent, eligible) {
                tracing::warn!(
                    charge = snap.charge_percent,
                    threshold = rule.threshold(),
                    "Low battery"
                );
                fired = true;
            }
        }
        if fired {
            self.notify(
                NoticeLevel::Warning,
                format!("Battery low: {}% remaining", snap.charge_percent),
            );
        }
    }

    fn set_charge_limit(&mut self, limit: u8) {
        if !DAEMON_BOUNDS.contains(limit) {
            tracing::warn!(limit, "Ignoring out-of-range charge limit");
            return;
        }
        match self.session.current() {
            Some(session) => {
                let uid = session.uid;
                let mut cfg = self.store.read_user(uid);
                cfg.charge_limit = limit;
                if let Err(e) = self.store.write_user(uid, &cfg) {
                    // The limit still applies for this boot via the
                    // in-memory resolution below.
                    tracing::error!(uid, error = %e, "Failed to persist charge limit");
                }
            }
            None => {
                tracing::warn!(limit, "No active session; charge limit not persisted");
            }
        }
        tracing::info!(limit, "Charge limit set");
        self.evaluate(None);
    }

    fn set_power_feature(&mut self, feature: PowerFeature, enable: bool) {
        tracing::info!(feature = ?feature, enable, "Power feature request");
        match feature {
            PowerFeature::PreventDisplaySleep => {
                match self
                    .source
                    .set_sleep_assertion(SleepAssertion::PreventDisplaySleep, enable)
                {
                    Ok(()) => self.flags.prevent_display_sleep = enable,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to update display-sleep assertion");
                    }
                }
            }
            PowerFeature::PreventSystemSleep => {
                match self
                    .source
                    .set_sleep_assertion(SleepAssertion::PreventSystemSleep, enable)
                {
                    Ok(()) => self.flags.prevent_system_sleep = enable,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to update system-sleep assertion");
                    }
                }
            }
            PowerFeature::ForceDischarge => {
                let mode = if enable {
                    ForceDischargeMode::On
                } else {
                    ForceDischargeMode::Off
                };
                self.request_force_discharge(mode);
            }
            PowerFeature::ForceDischargeAuto => {
                let mode = if enable {
                    ForceDischargeMode::Auto
                } else {
                    ForceDischargeMode::Off
                };
                self.request_force_discharge(mode);
            }
            PowerFeature::ControlLed => {
                self.flags.control_led = enable;
                self.persist_session_flags();
                if !enable && self.source.led_supported() {
                    self.led.release(&self.source);
                }
            }
            PowerFeature::DisableChargingBeforeSleep => {
                self.flags.disable_charging_before_sleep = enable;
                self.persist_session_flags();
            }
            PowerFeature::LowPowerMode => {
                if let Err(e) = self.source.set_low_power_mode(enable) {
                    tracing::error!(error = %e, "Failed to set low-power mode");
                }
            }
        }
        // Every feature mutation runs the decision pass before the caller
        // gets its Ack, so a follow-up GetStatus reads settled state.
        self.evaluate(None);
    }

    fn request_force_discharge(&mut self, mode: ForceDischargeMode) {
        if mode.discharging() {
            let adapter_present = self
                .last_snapshot
                .as_ref()
                .is_some_and(TelemetrySnapshot::adapter_present);
            if !adapter_present {
                tracing::warn!(mode = ?mode, "No adapter present; ignoring forced-discharge request");
                return;
            }
        }

        let mut snap = self.last_snapshot.clone().unwrap_or_default();
        self.set_force_discharge_mode(mode, &mut snap);
        self.last_snapshot = Some(snap);
    }

    /// Transition the forced-discharge mode and bring the adapter switch
    /// in line. The cutoff rule is disarmed on every transition; entering
    /// `Auto` re-arms it on the next evaluation.
    fn set_force_discharge_mode(&mut self, mode: ForceDischargeMode, snap: &mut TelemetrySnapshot) {
        self.cutoff.disarm();
        self.force_discharge = mode;

        let want_adapter = !mode.discharging();
        if snap.adapter_enabled != want_adapter {
            if let Err(e) = self.source.set_adapter_enabled(want_adapter) {
                tracing::error!(error = %e, enable = want_adapter, "Failed to switch adapter");
            } else {
                snap.adapter_enabled = want_adapter;
            }
        }
        tracing::info!(mode = ?mode, "Forced-discharge mode set");
    }

    /// Safe-default reset for the login screen: no LED control, no sleep
    /// assertions, no forced discharge. Disabling charging before sleep
    /// is ON so an unattended machine cannot drift past the limit.
    fn enter_no_session(&mut self) {
        if self.source.led_supported() {
            self.led.release(&self.source);
        }
        self.clear_transient_state();
        self.flags.control_led = false;
        self.flags.disable_charging_before_sleep = true;
    }

    /// Drop sleep assertions and forced discharge, and put the adapter
    /// back on. Runs on every session transition.
    fn clear_transient_state(&mut self) {
        self.flags.prevent_display_sleep = false;
        self.flags.prevent_system_sleep = false;
        if let Err(e) = self.source.allow_all_sleep() {
            tracing::warn!(error = %e, "Failed to drop sleep assertions");
        }

        self.cutoff.disarm();
        self.force_discharge = ForceDischargeMode::Off;
        // Commanded regardless of the in-memory mode: a restart while the
        // adapter was force-disabled leaves hardware state the engine has
        // no record of, and the charging path refuses to touch it.
        match self.source.set_adapter_enabled(true) {
            Ok(()) => {
                if let Some(snap) = self.last_snapshot.as_mut() {
                    snap.adapter_enabled = true;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to re-enable adapter on session change");
            }
        }
    }

    /// Re-create assertions the user still wants after a wake cycle;
    /// the OS drops them across suspend.
    fn reapply_sleep_assertions(&mut self) {
        for (wanted, kind) in [
            (self.flags.prevent_display_sleep, SleepAssertion::PreventDisplaySleep),
            (self.flags.prevent_system_sleep, SleepAssertion::PreventSystemSleep),
        ] {
            if wanted {
                if let Err(e) = self.source.set_sleep_assertion(kind, true) {
                    tracing::error!(kind = ?kind, error = %e, "Failed to re-apply sleep assertion");
                }
            }
        }
    }

    fn persist_session_flags(&mut self) {
        let Some(session) = self.session.current() else {
            return;
        };
        let uid = session.uid;
        let mut cfg = self.store.read_user(uid);
        cfg.control_led = self.flags.control_led;
        cfg.disable_charging_before_sleep = self.flags.disable_charging_before_sleep;
        if let Err(e) = self.store.write_user(uid, &cfg) {
            tracing::error!(uid, error = %e, "Failed to persist feature flags");
        }
    }

    fn notify(&self, level: NoticeLevel, message: String) {
        let msg = DaemonMessage::Notice { level, message };
        if let Err(e) = self.notice_tx.try_send(msg) {
            tracing::warn!(error = %e, "Notice channel full; dropping notice");
        }
    }

    /// Graceful shutdown: release the LED and drop sleep assertions, but
    /// leave the charging/adapter switches exactly as the rules set them.
    pub fn shutdown(&mut self) {
        if self.source.led_supported() {
            self.led.release(&self.source);
        }
        if let Err(e) = self.source.allow_all_sleep() {
            tracing::warn!(error = %e, "Failed to drop sleep assertions on shutdown");
        }
        tracing::info!("Engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChargeConfig;
    use crate::led::LedTarget;
    use crate::protocol::RequestId;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct MockState {
        snapshot: TelemetrySnapshot,
        snapshot_fails: bool,
        charging_commands: Vec<bool>,
        adapter_commands: Vec<bool>,
        led_writes: Vec<LedTarget>,
        low_power: bool,
    }

    #[derive(Clone, Default)]
    struct MockPowerSource {
        state: Arc<Mutex<MockState>>,
    }

    impl MockPowerSource {
        fn with_snapshot(snapshot: TelemetrySnapshot) -> Self {
            let mock = Self::default();
            mock.state.lock().unwrap().snapshot = snapshot;
            mock
        }

        fn set_snapshot(&self, snapshot: TelemetrySnapshot) {
            self.state.lock().unwrap().snapshot = snapshot;
        }

        fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
            self.state.lock().unwrap()
        }
    }

    impl PowerSource for MockPowerSource {
        fn snapshot(&self) -> anyhow::Result<TelemetrySnapshot> {
            let state = self.state.lock().unwrap();
            if state.snapshot_fails {
                anyhow::bail!("telemetry unavailable");
            }
            Ok(state.snapshot.clone())
        }

        fn set_charging_enabled(&self, enable: bool) -> anyhow::Result<()> {
            let mut state = self.state.lock().unwrap();
            state.charging_commands.push(enable);
            state.snapshot.charging_enabled = enable;
            Ok(())
        }

        fn set_adapter_enabled(&self, enable: bool) -> anyhow::Result<()> {
            let mut state = self.state.lock().unwrap();
            state.adapter_commands.push(enable);
            state.snapshot.adapter_enabled = enable;
            Ok(())
        }

        fn led_supported(&self) -> bool {
            true
        }

        fn set_led(&self, target: LedTarget) -> anyhow::Result<()> {
            self.state.lock().unwrap().led_writes.push(target);
            Ok(())
        }

        fn set_sleep_assertion(&self, _kind: SleepAssertion, _active: bool) -> anyhow::Result<()> {
            Ok(())
        }

        fn allow_all_sleep(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn set_low_power_mode(&self, enable: bool) -> anyhow::Result<()> {
            self.state.lock().unwrap().low_power = enable;
            Ok(())
        }

        fn low_power_mode_enabled(&self) -> bool {
            self.state.lock().unwrap().low_power
        }
    }

    fn snapshot(charge: u8, charging: bool, charging_enabled: bool) -> TelemetrySnapshot {
        TelemetrySnapshot {
            charge_percent: charge,
            is_charging: charging,
            is_connected: true,
            charging_enabled,
            adapter_enabled: true,
            adapter_max_watts: 96,
            ..TelemetrySnapshot::default()
        }
    }

    struct Fixture {
        engine: PowerEngine<MockPowerSource>,
        source: MockPowerSource,
        notices: mpsc::Receiver<DaemonMessage>,
        _dir: TempDir,
    }

    fn fixture(snapshot: TelemetrySnapshot) -> Fixture {
        let dir = TempDir::new().unwrap();
        let source = MockPowerSource::with_snapshot(snapshot);
        let (engine, notices) = PowerEngine::new(
            source.clone(),
            ConfigStore::new(dir.path()),
            EngineConfig::default(),
        );
        Fixture {
            engine,
            source,
            notices,
            _dir: dir,
        }
    }

    fn sign_in(engine: &mut PowerEngine<MockPowerSource>, uid: u32) {
        engine.handle_session_observation(Some(Session {
            uid,
            username: format!("user{uid}"),
            home_dir: PathBuf::from(format!("/home/user{uid}")),
        }));
    }

    #[test]
    fn below_limit_with_charging_enabled_is_noop() {
        let mut fx = fixture(snapshot(79, true, true));
        fx.engine.tick();
        assert!(fx.source.state().charging_commands.is_empty());
    }

    #[test]
    fn at_limit_disables_charging() {
        let mut fx = fixture(snapshot(80, true, true));
        fx.engine.tick();
        assert_eq!(fx.source.state().charging_commands, vec![false]);
    }

    #[test]
    fn below_limit_reenables_charging() {
        let mut fx = fixture(snapshot(79, false, false));
        fx.engine.tick();
        assert_eq!(fx.source.state().charging_commands, vec![true]);
    }

    #[test]
    fn repeated_ticks_issue_no_redundant_commands() {
        let mut fx = fixture(snapshot(80, true, true));
        fx.engine.tick();
        fx.engine.tick();
        fx.engine.tick();
        assert_eq!(fx.source.state().charging_commands, vec![false]);
    }

    #[test]
    fn start_releases_led_to_system() {
        let mut fx = fixture(snapshot(50, true, true));
        fx.engine.start().unwrap();
        assert_eq!(
            fx.source.state().led_writes.first(),
            Some(&LedTarget::SystemControlled)
        );
    }

    #[test]
    fn telemetry_failure_skips_evaluation() {
        let mut fx = fixture(snapshot(80, true, true));
        fx.source.state().snapshot_fails = true;
        fx.engine.tick();
        assert!(fx.source.state().charging_commands.is_empty());
    }

    #[test]
    fn user_limit_overrides_builtin() {
        let mut fx = fixture(snapshot(75, true, true));
        sign_in(&mut fx.engine, 501);
        fx.engine.handle_request(
            &ConnectionId::new(),
            ClientRequest::SetChargeLimit {
                request_id: RequestId::new(),
                limit: 70,
            },
        );
        // 75 >= the new limit of 70, so charging goes off.
        assert_eq!(fx.engine.effective_limit(), 70);
        assert_eq!(fx.source.state().charging_commands.last(), Some(&false));
    }

    #[test]
    fn out_of_range_limit_is_ignored() {
        let mut fx = fixture(snapshot(50, true, true));
        sign_in(&mut fx.engine, 501);
        fx.engine.handle_request(
            &ConnectionId::new(),
            ClientRequest::SetChargeLimit {
                request_id: RequestId::new(),
                limit: 30,
            },
        );
        assert_eq!(fx.engine.effective_limit(), limits::BUILTIN_DEFAULT_LIMIT);
    }

    #[test]
    fn forced_discharge_disables_adapter_and_back() {
        let mut fx = fixture(snapshot(90, false, false));
        fx.engine.tick();

        fx.engine.handle_request(
            &ConnectionId::new(),
            ClientRequest::SetPowerFeature {
                request_id: RequestId::new(),
                feature: PowerFeature::ForceDischarge,
                enable: true,
            },
        );
        assert_eq!(fx.source.state().adapter_commands.last(), Some(&false));
        assert!(fx.engine.status_report().force_discharge_active);

        fx.engine.handle_request(
            &ConnectionId::new(),
            ClientRequest::SetPowerFeature {
                request_id: RequestId::new(),
                feature: PowerFeature::ForceDischarge,
                enable: false,
            },
        );
        assert_eq!(fx.source.state().adapter_commands.last(), Some(&true));
        assert!(!fx.engine.status_report().force_discharge_active);
    }

    #[test]
    fn forced_discharge_without_adapter_is_refused() {
        let mut fx = fixture(TelemetrySnapshot {
            charge_percent: 90,
            ..TelemetrySnapshot::default()
        });
        fx.engine.tick();

        fx.engine.handle_request(
            &ConnectionId::new(),
            ClientRequest::SetPowerFeature {
                request_id: RequestId::new(),
                feature: PowerFeature::ForceDischarge,
                enable: true,
            },
        );
        assert!(fx.source.state().adapter_commands.is_empty());
        assert!(!fx.engine.status_report().force_discharge_active);
    }

    #[test]
    fn auto_mode_cuts_off_at_limit_and_notifies() {
        let mut fx = fixture(snapshot(90, false, false));
        fx.engine.tick();

        fx.engine.handle_request(
            &ConnectionId::new(),
            ClientRequest::SetPowerFeature {
                request_id: RequestId::new(),
                feature: PowerFeature::ForceDischargeAuto,
                enable: true,
            },
        );
        assert!(fx.engine.status_report().force_discharge_active);

        // Cutoff for the default limit of 80 is 80; discharge down to it.
        fx.source.set_snapshot(TelemetrySnapshot {
            adapter_enabled: false,
            ..snapshot(85, false, false)
        });
        fx.engine.tick();
        assert!(fx.engine.status_report().force_discharge_active);

        fx.source.set_snapshot(TelemetrySnapshot {
            adapter_enabled: false,
            ..snapshot(80, false, false)
        });
        fx.engine.tick();
        assert!(!fx.engine.status_report().force_discharge_active);
        assert_eq!(fx.source.state().adapter_commands.last(), Some(&true));

        let notice = fx.notices.try_recv().unwrap();
        assert!(matches!(
            notice,
            DaemonMessage::Notice {
                level: NoticeLevel::Info,
                ..
            }
        ));
    }

    #[test]
    fn adapter_removal_ends_forced_discharge() {
        let mut fx = fixture(snapshot(90, false, false));
        fx.engine.tick();
        fx.engine.handle_request(
            &ConnectionId::new(),
            ClientRequest::SetPowerFeature {
                request_id: RequestId::new(),
                feature: PowerFeature::ForceDischarge,
                enable: true,
            },
        );
        assert!(fx.engine.status_report().force_discharge_active);

        fx.source.set_snapshot(TelemetrySnapshot {
            charge_percent: 85,
            ..TelemetrySnapshot::default()
        });
        fx.engine.tick();
        assert!(!fx.engine.status_report().force_discharge_active);
    }

    #[test]
    fn low_battery_notice_fires_once_per_edge() {
        let mut fx = fixture(TelemetrySnapshot {
            charge_percent: 25,
            ..TelemetrySnapshot::default()
        });
        fx.engine.tick();
        assert!(fx.notices.try_recv().is_err());

        for charge in [21, 19, 18] {
            fx.source.set_snapshot(TelemetrySnapshot {
                charge_percent: charge,
                ..TelemetrySnapshot::default()
            });
            fx.engine.tick();
        }
        assert!(matches!(
            fx.notices.try_recv().unwrap(),
            DaemonMessage::Notice {
                level: NoticeLevel::Warning,
                ..
            }
        ));
        assert!(fx.notices.try_recv().is_err());
    }

    #[test]
    fn charging_suppresses_low_battery_warning() {
        let mut fx = fixture(TelemetrySnapshot {
            charge_percent: 15,
            is_charging: true,
            is_connected: true,
            charging_enabled: true,
            adapter_enabled: true,
            adapter_max_watts: 96,
            ..TelemetrySnapshot::default()
        });
        fx.engine.tick();
        assert!(fx.notices.try_recv().is_err());

        // Adapter yanked at the same charge level: now it warns.
        fx.source.set_snapshot(TelemetrySnapshot {
            charge_percent: 15,
            ..TelemetrySnapshot::default()
        });
        fx.engine.tick();
        assert!(matches!(
            fx.notices.try_recv().unwrap(),
            DaemonMessage::Notice {
                level: NoticeLevel::Warning,
                ..
            }
        ));
    }

    #[test]
    fn sign_out_applies_safe_defaults() {
        let mut fx = fixture(snapshot(90, false, false));
        sign_in(&mut fx.engine, 501);
        fx.engine.handle_request(
            &ConnectionId::new(),
            ClientRequest::SetPowerFeature {
                request_id: RequestId::new(),
                feature: PowerFeature::ForceDischarge,
                enable: true,
            },
        );
        fx.engine.handle_request(
            &ConnectionId::new(),
            ClientRequest::SetPowerFeature {
                request_id: RequestId::new(),
                feature: PowerFeature::ControlLed,
                enable: true,
            },
        );

        fx.engine.handle_session_observation(None);

        let report = fx.engine.status_report();
        assert!(!report.force_discharge_active);
        assert!(!report.led_control_active);
        assert!(report.disable_charging_before_sleep_active);
        assert_eq!(
            fx.source.state().led_writes.last(),
            Some(&LedTarget::SystemControlled)
        );
    }

    #[test]
    fn user_switch_clears_forced_discharge() {
        let mut fx = fixture(snapshot(90, false, false));
        sign_in(&mut fx.engine, 501);
        fx.engine.handle_request(
            &ConnectionId::new(),
            ClientRequest::SetPowerFeature {
                request_id: RequestId::new(),
                feature: PowerFeature::ForceDischarge,
                enable: true,
            },
        );
        assert!(fx.engine.status_report().force_discharge_active);

        sign_in(&mut fx.engine, 502);
        assert!(!fx.engine.status_report().force_discharge_active);
        assert_eq!(fx.source.state().adapter_commands.last(), Some(&true));
    }

    #[test]
    fn no_session_entry_recovers_stale_adapter() {
        // Adapter left force-disabled by a previous run: the engine's own
        // mode is Off but the hardware still says disabled.
        let mut fx = fixture(TelemetrySnapshot {
            adapter_enabled: false,
            ..snapshot(70, false, true)
        });
        fx.engine.tick();

        fx.engine.handle_session_observation(None);
        assert_eq!(fx.source.state().adapter_commands.last(), Some(&true));
    }

    #[test]
    fn sign_in_recovers_stale_adapter() {
        let mut fx = fixture(TelemetrySnapshot {
            adapter_enabled: false,
            ..snapshot(70, false, true)
        });
        fx.engine.tick();

        sign_in(&mut fx.engine, 501);
        assert_eq!(fx.source.state().adapter_commands.last(), Some(&true));
    }

    #[test]
    fn feature_toggle_reruns_charging_rule() {
        // Charging is live above the limit when the request lands; the
        // mutation itself must stop it, not the next timer pass.
        let mut fx = fixture(snapshot(85, true, true));
        fx.engine.handle_request(
            &ConnectionId::new(),
            ClientRequest::SetPowerFeature {
                request_id: RequestId::new(),
                feature: PowerFeature::DisableChargingBeforeSleep,
                enable: true,
            },
        );
        assert_eq!(fx.source.state().charging_commands.last(), Some(&false));
    }

    #[test]
    fn sign_in_restores_user_preferences() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        store
            .write_user(
                501,
                &ChargeConfig {
                    charge_limit: 70,
                    control_led: true,
                    disable_charging_before_sleep: true,
                },
            )
            .unwrap();

        let source = MockPowerSource::with_snapshot(snapshot(50, true, true));
        let (mut engine, _notices) =
            PowerEngine::new(source, store, EngineConfig::default());
        sign_in(&mut engine, 501);

        let report = engine.status_report();
        assert_eq!(report.effective_limit, 70);
        assert!(report.led_control_active);
        assert!(report.disable_charging_before_sleep_active);
    }

    #[test]
    fn sleep_disables_charging_when_preference_set() {
        let mut fx = fixture(snapshot(50, true, true));
        fx.engine.tick();
        fx.engine.handle_request(
            &ConnectionId::new(),
            ClientRequest::SetPowerFeature {
                request_id: RequestId::new(),
                feature: PowerFeature::DisableChargingBeforeSleep,
                enable: true,
            },
        );
        fx.engine.handle_power_event(PowerEvent::WillSleep);
        assert_eq!(fx.source.state().charging_commands.last(), Some(&false));

        // Wake below the limit re-enables.
        fx.engine.handle_power_event(PowerEvent::DidWake);
        assert_eq!(fx.source.state().charging_commands.last(), Some(&true));
    }

    #[test]
    fn handshake_rejects_version_mismatch() {
        let mut fx = fixture(snapshot(50, true, true));
        let reply = fx.engine.handle_request(
            &ConnectionId::new(),
            ClientRequest::Handshake {
                request_id: RequestId::new(),
                protocol_version: PROTOCOL_VERSION + 1,
            },
        );
        assert!(matches!(
            reply,
            DaemonMessage::HandshakeAck {
                accepted: false,
                rejection_reason: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn version_reports_build_id() {
        let dir = TempDir::new().unwrap();
        let source = MockPowerSource::with_snapshot(snapshot(50, true, true));
        let (mut engine, _notices) = PowerEngine::new(
            source,
            ConfigStore::new(dir.path()),
            EngineConfig {
                build_id: "2026.08.1".to_string(),
                ..EngineConfig::default()
            },
        );
        let reply = engine.handle_request(
            &ConnectionId::new(),
            ClientRequest::GetVersion {
                request_id: RequestId::new(),
            },
        );
        match reply {
            DaemonMessage::Version { build_id, .. } => assert_eq!(build_id, "2026.08.1"),
            other => panic!("expected Version, got {other:?}"),
        }
    }

    #[test]
    fn status_before_first_telemetry_is_zeroed() {
        let dir = TempDir::new().unwrap();
        let source = MockPowerSource::default();
        source.state().snapshot_fails = true;
        let (engine, _notices) = PowerEngine::new(
            source,
            ConfigStore::new(dir.path()),
            EngineConfig::default(),
        );
        let report = engine.status_report();
        assert!(!report.has_telemetry);
        assert_eq!(report.charge_percent, 0);
        assert_eq!(report.effective_limit, limits::BUILTIN_DEFAULT_LIMIT);
    }
}
