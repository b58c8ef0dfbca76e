//! Station
//!
//! Ties the engine, controller, power source and settings together and keeps
//! the link healthy: a missing module puts the station in monitor-only mode,
//! a failed heartbeat triggers re-discovery.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::config::{load_or_default, AppConfig, ChargeThresholds, ConfigStore};
use crate::control::{ChargeAlert, ChargeController, Decision, TickReport};
use crate::learn::{learn_codes, LearnOutcome, LearnPrompt};
use crate::outlet::OutletProfile;
use crate::power::{LineStatus, PowerSample, PowerSource};
use crate::protocol::{PortOpener, ProtocolEngine, ProtocolError};

/// Link status while no module is attached
pub const STATUS_DISABLED: &str = "Outlet control is DISABLED";
/// Link status after a failed heartbeat
pub const STATUS_LOST: &str = "Lost communication with ChargeOn module";

/// What happened during one scheduler tick
#[derive(Debug)]
pub enum TickOutcome {
    /// An exchange was in progress; nothing was done
    Busy,
    /// The tick ran
    Completed(TickSummary),
}

/// Details of a completed tick
#[derive(Debug)]
pub struct TickSummary {
    /// `None` when the power source failed
    pub sample: Option<PowerSample>,
    /// Sample differs from the previous tick
    pub sample_changed: bool,
    /// `None` in monitor-only mode
    pub control: Option<TickReport>,
    /// Heartbeat failed this tick
    pub link_lost: bool,
}

impl TickSummary {
    /// Alert raised by the controller this tick
    pub fn alert(&self) -> Option<ChargeAlert> {
        self.control.as_ref().and_then(|report| report.alert)
    }
}

/// Snapshot for display
#[derive(Debug, Clone)]
pub struct StationStatus {
    /// Connection state, e.g. "Connected on COM3"
    pub link: String,
    /// Last outlet action or error, empty when idle
    pub activity: String,
    /// No module is attached
    pub monitor_only: bool,
    /// Last power sample, if one was collected
    pub sample: Option<PowerSample>,
    /// Time of the last tick
    pub checked_at: Option<DateTime<Local>>,
}

impl fmt::Display for StationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(at) = self.checked_at {
            write!(f, "{}    ", at.format("%H:%M:%S"))?;
        }
        match &self.sample {
            Some(sample) => write!(f, "{}", sample)?,
            None => f.write_str("Could not collect battery info")?,
        }
        write!(f, "    {}", self.link)?;
        if !self.activity.is_empty() {
            write!(f, "    {}", self.activity)?;
        }
        Ok(())
    }
}

fn command_error(on: bool) -> String {
    format!("ERROR while turning outlet {}", if on { "ON" } else { "OFF" })
}

/// Host side of one ChargeOn installation
pub struct Station {
    engine: Arc<ProtocolEngine>,
    opener: Box<dyn PortOpener + Send>,
    power: Box<dyn PowerSource>,
    store: Box<dyn ConfigStore>,
    config: AppConfig,
    controller: ChargeController,
    monitor_only: bool,
    last_sample: Option<PowerSample>,
    link_status: String,
    activity: String,
    checked_at: Option<DateTime<Local>>,
}

impl Station {
    /// Load settings from `store`. Nothing is discovered until [`Station::startup`].
    pub fn new(
        engine: Arc<ProtocolEngine>,
        opener: Box<dyn PortOpener + Send>,
        power: Box<dyn PowerSource>,
        store: Box<dyn ConfigStore>,
    ) -> Self {
        let config = load_or_default(store.as_ref());
        let controller = ChargeController::new(config.thresholds());
        Self {
            engine,
            opener,
            power,
            store,
            config,
            controller,
            monitor_only: true,
            last_sample: None,
            link_status: STATUS_DISABLED.to_string(),
            activity: String::new(),
            checked_at: None,
        }
    }

    /// Shared exchange engine
    pub fn engine(&self) -> &Arc<ProtocolEngine> {
        &self.engine
    }

    /// Current settings
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Charge controller state
    pub fn controller(&self) -> &ChargeController {
        &self.controller
    }

    /// No module is attached, the battery is only watched
    pub fn is_monitor_only(&self) -> bool {
        self.monitor_only
    }

    /// Find the module and bring its settings up to date.
    ///
    /// On failure the station stays in monitor-only mode and keeps looking on
    /// every tick.
    pub fn startup(&mut self) -> Result<String, ProtocolError> {
        self.connect()
    }

    fn connect(&mut self) -> Result<String, ProtocolError> {
        match self.engine.discover(self.opener.as_ref()) {
            Ok(port) => {
                self.monitor_only = false;
                self.link_status = format!("Connected on {}", port);
                self.activity.clear();
                if let Err(e) = self.sync_settings() {
                    tracing::warn!("could not send outlet settings: {}", e);
                }
                Ok(port)
            }
            Err(e) => {
                if !self.monitor_only {
                    tracing::warn!("{}; monitoring battery only", e);
                } else {
                    tracing::debug!("{}", e);
                }
                self.monitor_only = true;
                self.link_status = STATUS_DISABLED.to_string();
                Err(e)
            }
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.config) {
            tracing::warn!("could not save settings: {}", e);
        }
    }

    /// Push the outlet settings to the module.
    ///
    /// An unconfigured profile is first replaced by whatever the module has
    /// in EEPROM. The settings are saved after a confirmed push.
    pub fn sync_settings(&mut self) -> Result<(), ProtocolError> {
        if self.config.outlet.is_unconfigured() {
            match self.engine.read_nonvolatile(self.config.outlet) {
                Ok(profile) => {
                    tracing::info!("outlet settings read from module EEPROM");
                    self.config.outlet = profile;
                }
                Err(e) => tracing::warn!("could not read module EEPROM: {}", e),
            }
        }

        self.engine.push_settings(&self.config.outlet)?;
        self.persist();
        Ok(())
    }

    /// Replace the outlet settings (user edit) and push them when connected
    ///
    /// While connected the profile is only kept once the module accepted it.
    pub fn update_outlet(&mut self, profile: OutletProfile) -> Result<(), ProtocolError> {
        if !self.monitor_only {
            self.engine.push_settings(&profile)?;
        }
        self.config.outlet = profile;
        self.persist();
        Ok(())
    }

    /// Apply and save new charge thresholds
    pub fn set_thresholds(&mut self, thresholds: ChargeThresholds) {
        self.controller.set_thresholds(thresholds);
        self.config.set_thresholds(thresholds);
        self.persist();
    }

    /// Manual ON/OFF, through the same sticky flags as automatic control
    pub fn switch_outlet(&mut self, on: bool) -> Result<(), ProtocolError> {
        let decision = if on {
            Decision::TurnOn
        } else {
            Decision::TurnOff
        };
        self.activity = decision.to_string();
        let result = self.controller.command(on, self.engine.as_ref());
        if result.is_err() {
            self.activity = command_error(on);
        }
        result
    }

    /// Interactive capture of new codes; an accepted capture is pushed and saved
    pub fn learn(&mut self, prompt: &mut dyn LearnPrompt) -> Result<LearnOutcome, ProtocolError> {
        let outcome = learn_codes(self.engine.as_ref(), self.config.outlet, prompt)?;
        if let LearnOutcome::Captured(profile) = outcome {
            self.update_outlet(profile)?;
        }
        Ok(outcome)
    }

    /// Ask the module to print its settings on its debug port
    pub fn show_settings(&self) -> Result<(), ProtocolError> {
        self.engine.show_settings()
    }

    /// Module firmware build, e.g. "0.8.07"
    pub fn firmware_version(&self) -> Result<String, ProtocolError> {
        self.engine.firmware_version()
    }

    fn collect_sample(&mut self) -> Option<PowerSample> {
        match self.power.sample() {
            Ok(sample) => Some(sample),
            Err(e) => {
                tracing::warn!("Could not collect battery info: {}", e);
                None
            }
        }
    }

    /// One scheduler tick
    pub fn tick(&mut self) -> TickOutcome {
        if self.engine.is_busy() {
            tracing::debug!("exchange in progress, skipping tick");
            return TickOutcome::Busy;
        }

        if self.monitor_only {
            let _ = self.connect();
        }

        self.checked_at = Some(Local::now());
        let sample = self.collect_sample();
        let sample_changed = sample != self.last_sample;
        if let Some(s) = &sample {
            if self.config.update_every_check || sample_changed {
                tracing::info!("{}", s);
            }
            let line_changed = self.last_sample.map(|last| last.line) != Some(s.line);
            if line_changed {
                self.activity.clear();
            }
        }
        self.last_sample = sample;

        if self.monitor_only {
            return TickOutcome::Completed(TickSummary {
                sample,
                sample_changed,
                control: None,
                link_lost: false,
            });
        }

        let report = self.controller.tick(sample.as_ref(), self.engine.as_ref());
        match (&report.decision, &report.command) {
            (decision, Some(Err(_))) => {
                self.activity = command_error(*decision == Decision::TurnOn);
            }
            (Decision::TurnOn | Decision::TurnOff, Some(Ok(()))) => {
                self.activity = report.decision.to_string();
            }
            _ => {}
        }

        let link_lost = self.check_link();
        TickOutcome::Completed(TickSummary {
            sample,
            sample_changed,
            control: Some(report),
            link_lost,
        })
    }

    fn check_link(&mut self) -> bool {
        let heartbeat = self.engine.heartbeat();
        self.handle_heartbeat(heartbeat)
    }

    /// Only link faults drop the link and start a new search for the module
    fn handle_heartbeat(&mut self, heartbeat: Result<(), ProtocolError>) -> bool {
        match heartbeat {
            Ok(()) => {
                if let Some(port) = self.engine.port_name() {
                    self.link_status = format!("Connected on {}", port);
                }
                false
            }
            Err(e) if !e.is_link_fault() => {
                tracing::debug!("heartbeat skipped: {}", e);
                false
            }
            Err(e) => {
                tracing::warn!("{}: {}", STATUS_LOST, e);
                self.link_status = STATUS_LOST.to_string();
                if let Err(e) = self.engine.close() {
                    tracing::debug!("close after lost link: {}", e);
                }
                let _ = self.connect();
                true
            }
        }
    }

    /// Snapshot for display
    pub fn status(&self) -> StationStatus {
        StationStatus {
            link: self.link_status.clone(),
            activity: self.activity.clone(),
            monitor_only: self.monitor_only,
            sample: self.last_sample,
            checked_at: self.checked_at,
        }
    }

    /// Save settings and release the module.
    ///
    /// When the battery is discharging the outlet is turned back on first if
    /// the profile asks for it or `restore_power` is set.
    pub fn shutdown(&mut self, restore_power: bool) -> Result<(), ProtocolError> {
        self.persist();

        let discharging = matches!(
            self.last_sample,
            Some(PowerSample {
                line: LineStatus::Offline,
                ..
            })
        );
        let mut result = Ok(());
        if !self.monitor_only
            && discharging
            && (self.config.outlet.restore_on_shutdown || restore_power)
        {
            tracing::info!("battery is discharging, turning outlet ON before exit");
            result = self.controller.command(true, self.engine.as_ref());
        }

        self.engine.close()?;
        self.monitor_only = true;
        self.link_status = STATUS_DISABLED.to_string();
        result
    }
}
