//! Charge controller
//!
//! Hysteresis between two thresholds, plus sticky "commanding" flags so a
//! switch that has not yet shown up in the line status is followed through
//! on the next tick instead of being abandoned.
//!
//! Whenever the information is incomplete the controller asks for ON. Being
//! plugged in is always the safe side.

use std::fmt;

use crate::config::{ChargeThresholds, THRESHOLD_GAP};
use crate::power::{LineStatus, PowerSample};
use crate::protocol::{ProtocolEngine, ProtocolError};

/// What the controller wants done with the outlet this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Plug the charger in
    TurnOn,
    /// Unplug the charger
    TurnOff,
    /// Leave the outlet as it is
    NoChange,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Decision::TurnOn => "Turning outlet ON",
            Decision::TurnOff => "Turning outlet OFF",
            Decision::NoChange => "No change",
        };
        f.write_str(text)
    }
}

/// One-shot notifications raised by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeAlert {
    /// Still discharging well below the minimum: the ON signal probably
    /// did not reach the outlet
    OutletDidNotTurnOn {
        /// Battery level when the alert was raised
        battery_percent: u8,
    },
}

impl fmt::Display for ChargeAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChargeAlert::OutletDidNotTurnOn { battery_percent } => write!(
                f,
                "Outlet has not turned on as expected ({}%). Try repositioning the ChargeOn module, or turn on the outlet manually.",
                battery_percent
            ),
        }
    }
}

/// Anything that can switch the outlet
pub trait OutletSwitch {
    /// Send ON (`true`) or OFF and wait for the confirmation
    fn switch_outlet(&self, on: bool) -> Result<(), ProtocolError>;
}

impl OutletSwitch for ProtocolEngine {
    fn switch_outlet(&self, on: bool) -> Result<(), ProtocolError> {
        ProtocolEngine::switch_outlet(self, on)
    }
}

/// Result of one controller tick
#[derive(Debug)]
pub struct TickReport {
    /// What the controller asked for
    pub decision: Decision,
    /// Outcome of the switch command, `None` when nothing was sent
    pub command: Option<Result<(), ProtocolError>>,
    /// Raised this tick, if any
    pub alert: Option<ChargeAlert>,
}

impl TickReport {
    /// A command was sent and not confirmed
    pub fn command_failed(&self) -> bool {
        matches!(self.command, Some(Err(_)))
    }
}

/// Hysteresis state machine
#[derive(Debug, Clone)]
pub struct ChargeController {
    thresholds: ChargeThresholds,
    commanding_on: bool,
    commanding_off: bool,
    discharge_alert_raised: bool,
}

impl ChargeController {
    /// Controller with no command in flight
    pub fn new(thresholds: ChargeThresholds) -> Self {
        Self {
            thresholds,
            commanding_on: false,
            commanding_off: false,
            discharge_alert_raised: false,
        }
    }

    /// Current hysteresis band
    pub fn thresholds(&self) -> ChargeThresholds {
        self.thresholds
    }

    /// Takes effect on the next decision
    pub fn set_thresholds(&mut self, thresholds: ChargeThresholds) {
        self.thresholds = thresholds;
    }

    /// ON was sent and charging has not been seen yet
    pub fn is_commanding_on(&self) -> bool {
        self.commanding_on
    }

    /// OFF was sent and discharging has not been seen yet
    pub fn is_commanding_off(&self) -> bool {
        self.commanding_off
    }

    /// Decide without side effects. `None` means the sample could not be collected.
    pub fn decide(&self, sample: Option<&PowerSample>) -> Decision {
        let Some(sample) = sample else {
            return Decision::TurnOn;
        };
        let Some(percent) = sample.battery_percent else {
            return Decision::TurnOn;
        };

        match sample.line {
            LineStatus::Unknown => Decision::TurnOn,
            LineStatus::Online => {
                if percent >= self.thresholds.max() || self.commanding_off {
                    Decision::TurnOff
                } else {
                    Decision::NoChange
                }
            }
            LineStatus::Offline => {
                if percent <= self.thresholds.min() || self.commanding_on {
                    Decision::TurnOn
                } else {
                    Decision::NoChange
                }
            }
        }
    }

    /// Update the discharge alert latch, returning an alert the first time
    /// the battery drops clearly below the minimum while discharging
    fn check_alert(&mut self, sample: Option<&PowerSample>) -> Option<ChargeAlert> {
        let sample = sample?;
        match (sample.line, sample.battery_percent) {
            (LineStatus::Online, _) => {
                self.discharge_alert_raised = false;
                None
            }
            (LineStatus::Offline, Some(percent))
                if percent < self.thresholds.min().saturating_sub(THRESHOLD_GAP)
                    && !self.discharge_alert_raised =>
            {
                self.discharge_alert_raised = true;
                Some(ChargeAlert::OutletDidNotTurnOn {
                    battery_percent: percent,
                })
            }
            _ => None,
        }
    }

    /// Carry out `decision`.
    ///
    /// The sticky flag is set before the command goes out, so a failed
    /// command is retried on the next tick.
    pub fn apply(
        &mut self,
        decision: Decision,
        switch: &dyn OutletSwitch,
    ) -> Option<Result<(), ProtocolError>> {
        match decision {
            Decision::TurnOn => Some(self.command(true, switch)),
            Decision::TurnOff => Some(self.command(false, switch)),
            Decision::NoChange => {
                self.commanding_on = false;
                self.commanding_off = false;
                None
            }
        }
    }

    /// Switch the outlet and remember the transition in progress
    pub fn command(&mut self, on: bool, switch: &dyn OutletSwitch) -> Result<(), ProtocolError> {
        self.commanding_on = on;
        self.commanding_off = !on;

        let result = switch.switch_outlet(on);
        match &result {
            Ok(()) => tracing::info!("outlet switched {}", if on { "ON" } else { "OFF" }),
            Err(e) => tracing::warn!(
                "ERROR while turning outlet {}: {}",
                if on { "ON" } else { "OFF" },
                e
            ),
        }
        result
    }

    /// Decide and act on one sample
    pub fn tick(&mut self, sample: Option<&PowerSample>, switch: &dyn OutletSwitch) -> TickReport {
        let alert = self.check_alert(sample);
        if let Some(alert) = &alert {
            tracing::warn!("{}", alert);
        }

        let decision = self.decide(sample);
        let command = self.apply(decision, switch);
        TickReport {
            decision,
            command,
            alert,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct Recorder {
        sent: RefCell<Vec<bool>>,
        fail: Cell<bool>,
    }

    impl OutletSwitch for Recorder {
        fn switch_outlet(&self, on: bool) -> Result<(), ProtocolError> {
            self.sent.borrow_mut().push(on);
            if self.fail.get() {
                Err(ProtocolError::Timeout {
                    exchange: if on { "OUTLET ON" } else { "OUTLET OFF" },
                })
            } else {
                Ok(())
            }
        }
    }

    fn controller() -> ChargeController {
        ChargeController::new(ChargeThresholds::new(20, 100))
    }

    fn sample(line: LineStatus, pct: u8) -> PowerSample {
        PowerSample::new(line, Some(pct))
    }

    #[test]
    fn test_decision_at_thresholds() {
        let c = controller();
        assert_eq!(c.decide(Some(&sample(LineStatus::Online, 100))), Decision::TurnOff);
        assert_eq!(c.decide(Some(&sample(LineStatus::Offline, 20))), Decision::TurnOn);
        assert_eq!(c.decide(Some(&sample(LineStatus::Online, 50))), Decision::NoChange);
        assert_eq!(c.decide(Some(&sample(LineStatus::Offline, 50))), Decision::NoChange);
    }

    #[test]
    fn test_monotonic_over_range() {
        let c = controller();
        for pct in 0..=100u8 {
            let charging = c.decide(Some(&sample(LineStatus::Online, pct)));
            let discharging = c.decide(Some(&sample(LineStatus::Offline, pct)));
            assert_eq!(charging == Decision::TurnOff, pct >= 100, "charging at {}", pct);
            assert_eq!(discharging == Decision::TurnOn, pct <= 20, "discharging at {}", pct);
        }
    }

    #[test]
    fn test_off_sticks_until_line_flips() {
        let mut c = controller();
        let switch = Recorder::default();

        let report = c.tick(Some(&sample(LineStatus::Online, 100)), &switch);
        assert_eq!(report.decision, Decision::TurnOff);
        assert!(c.is_commanding_off());

        // Relay has not dropped yet, battery reading wobbles down
        let report = c.tick(Some(&sample(LineStatus::Online, 99)), &switch);
        assert_eq!(report.decision, Decision::TurnOff);

        // Now discharging, above minimum: nothing to do, flags clear
        let report = c.tick(Some(&sample(LineStatus::Offline, 98)), &switch);
        assert_eq!(report.decision, Decision::NoChange);
        assert!(!c.is_commanding_off());
        assert!(!c.is_commanding_on());

        assert_eq!(*switch.sent.borrow(), vec![false, false]);
    }

    #[test]
    fn test_on_sticks_until_line_flips() {
        let mut c = controller();
        let switch = Recorder::default();
        c.tick(Some(&sample(LineStatus::Offline, 20)), &switch);
        let report = c.tick(Some(&sample(LineStatus::Offline, 21)), &switch);
        assert_eq!(report.decision, Decision::TurnOn);
        let report = c.tick(Some(&sample(LineStatus::Online, 21)), &switch);
        assert_eq!(report.decision, Decision::NoChange);
    }

    #[test]
    fn test_unknown_data_forces_on() {
        let mut c = controller();
        let switch = Recorder::default();
        c.tick(Some(&sample(LineStatus::Online, 100)), &switch);
        assert!(c.is_commanding_off());

        // Sticky OFF does not override missing information
        assert_eq!(c.decide(None), Decision::TurnOn);
        assert_eq!(
            c.decide(Some(&PowerSample::new(LineStatus::Online, None))),
            Decision::TurnOn
        );
        assert_eq!(
            c.decide(Some(&sample(LineStatus::Unknown, 100))),
            Decision::TurnOn
        );
    }

    #[test]
    fn test_failed_command_keeps_flag() {
        let mut c = controller();
        let switch = Recorder::default();
        switch.fail.set(true);

        let report = c.tick(Some(&sample(LineStatus::Offline, 10)), &switch);
        assert!(report.command_failed());
        assert!(c.is_commanding_on());

        // Battery recovered a little on its own reading, flag still drives ON
        switch.fail.set(false);
        let report = c.tick(Some(&sample(LineStatus::Offline, 30)), &switch);
        assert_eq!(report.decision, Decision::TurnOn);
        assert!(matches!(report.command, Some(Ok(()))));
    }

    #[test]
    fn test_opposite_command_clears_flag() {
        let mut c = controller();
        let switch = Recorder::default();
        c.command(true, &switch).unwrap();
        assert!(c.is_commanding_on());
        c.command(false, &switch).unwrap();
        assert!(!c.is_commanding_on());
        assert!(c.is_commanding_off());
    }

    #[test]
    fn test_discharge_alert_once_until_charging() {
        let mut c = controller();
        let switch = Recorder::default();

        let report = c.tick(Some(&sample(LineStatus::Offline, 18)), &switch);
        assert_eq!(report.alert, None);

        let report = c.tick(Some(&sample(LineStatus::Offline, 17)), &switch);
        assert_eq!(
            report.alert,
            Some(ChargeAlert::OutletDidNotTurnOn { battery_percent: 17 })
        );
        let report = c.tick(Some(&sample(LineStatus::Offline, 16)), &switch);
        assert_eq!(report.alert, None);

        c.tick(Some(&sample(LineStatus::Online, 16)), &switch);
        let report = c.tick(Some(&sample(LineStatus::Offline, 15)), &switch);
        assert!(report.alert.is_some());
    }

    #[test]
    fn test_repeated_on_is_sent_again() {
        // Unknown status re-sends ON every tick; the module treats it as a no-op
        let mut c = controller();
        let switch = Recorder::default();
        for _ in 0..3 {
            c.tick(None, &switch);
        }
        assert_eq!(*switch.sent.borrow(), vec![true, true, true]);
    }
}
