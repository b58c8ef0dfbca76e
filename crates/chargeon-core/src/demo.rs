//! Demo Mode - simulated ChargeOn module and laptop battery
//!
//! Lets the whole stack run without hardware: [`DemoPorts`] offers a few
//! serial ports, only one of which has a [`SimulatedModule`] behind it, and
//! [`DemoBattery`] charges while the simulated outlet is on and drains while
//! it is off.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crate::outlet::OutletProfile;
use crate::power::{LineStatus, PowerError, PowerSample, PowerSource};
use crate::protocol::codec::apply_settings;
use crate::protocol::{ExchangeKind, PortOpener, ProtocolError, Transport};

/// Firmware build reported by the simulated module
pub const DEMO_BUILD: &str = "0.8.07";

/// Observable state of the simulated module
#[derive(Debug, Clone)]
pub struct ModuleState {
    /// Relay state after the last ON/OFF
    pub outlet_on: bool,
    /// Settings last pushed
    pub working: OutletProfile,
    /// Settings returned by an EEPROM read
    pub eeprom: OutletProfile,
    /// Answer to a firmware version request
    pub build: String,
    /// Codes handed out by successive LEARN requests; empty means nothing captured
    pub learn_codes: VecDeque<u32>,
    /// Stop answering, as if unplugged
    pub unresponsive: bool,
    /// Every request received, in order
    pub received: Vec<ExchangeKind>,
}

impl Default for ModuleState {
    fn default() -> Self {
        Self {
            outlet_on: true,
            working: OutletProfile::default(),
            eeprom: OutletProfile {
                on_code: 4_478_259,
                off_code: 4_478_268,
                protocol: 1,
                pulse_length: 185,
                restore_on_shutdown: true,
                value_length: 24,
                ..OutletProfile::default()
            },
            build: DEMO_BUILD.to_string(),
            learn_codes: VecDeque::new(),
            unresponsive: false,
            received: Vec::new(),
        }
    }
}

/// Shared view of a simulated module
#[derive(Debug, Clone, Default)]
pub struct ModuleHandle(Arc<Mutex<ModuleState>>);

impl ModuleHandle {
    /// Module starting from `state`
    pub fn new(state: ModuleState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    /// Lock the state for inspection or changes
    pub fn state(&self) -> MutexGuard<'_, ModuleState> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether the simulated outlet is powered
    pub fn outlet_on(&self) -> bool {
        self.state().outlet_on
    }

    /// Make the module ignore every request
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.state().unresponsive = unresponsive;
    }

    /// Queue codes for upcoming LEARN requests
    pub fn script_learn(&self, codes: &[u32]) {
        self.state().learn_codes.extend(codes.iter().copied());
    }
}

/// Module firmware stand-in, answering the full request set in memory
pub struct SimulatedModule {
    name: String,
    module: ModuleHandle,
    pending: Vec<u8>,
}

impl SimulatedModule {
    /// Module answering as port `name`
    pub fn new(name: impl Into<String>, module: ModuleHandle) -> Self {
        Self {
            name: name.into(),
            module,
            pending: Vec::new(),
        }
    }

    fn respond(&self, kind: ExchangeKind, request: &str) -> String {
        let mut state = self.module.state();
        state.received.push(kind);

        let mut response = kind.response().to_string();
        match kind {
            ExchangeKind::OutletOn => state.outlet_on = true,
            ExchangeKind::OutletOff => state.outlet_on = false,
            ExchangeKind::PushSettings => {
                let profile = apply_settings(state.working, request);
                state.working = profile;
                state.eeprom = profile;
            }
            ExchangeKind::ReadNonvolatile => {
                let p = state.eeprom;
                response.push_str(&format!(
                    "[On:{}][Off:{}][Pro:{}][PLen:{}][PReps:{}][TOBQ:{}][VLen:{}][]",
                    p.on_code,
                    p.off_code,
                    p.protocol,
                    p.pulse_length,
                    p.pulse_repeats,
                    u8::from(p.restore_on_shutdown),
                    p.value_length
                ));
            }
            ExchangeKind::LearnCode => {
                let code = state.learn_codes.pop_front().unwrap_or(0);
                let (protocol, pulse_length, value_length) = if code == 0 { (0, 0, 0) } else { (1, 320, 24) };
                response.push_str(&format!(
                    "[Code:{}][Pro:{}][PLen:{}][VLen:{}][]",
                    code, protocol, pulse_length, value_length
                ));
            }
            ExchangeKind::FirmwareVersion => {
                response.push_str(&format!("[Build:{}][]", state.build));
            }
            ExchangeKind::Presence | ExchangeKind::Heartbeat | ExchangeKind::ShowSettings => {}
        }
        response
    }
}

impl Transport for SimulatedModule {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if self.module.state().unresponsive {
            return Ok(());
        }
        let Some(kind) = ExchangeKind::from_request(bytes) else {
            tracing::debug!("demo module ignoring {:?}", String::from_utf8_lossy(bytes));
            return Ok(());
        };
        let response = self.respond(kind, &String::from_utf8_lossy(bytes));
        self.pending.extend_from_slice(response.as_bytes());
        Ok(())
    }

    fn receive(&mut self, max_bytes: usize) -> Result<Vec<u8>, ProtocolError> {
        let n = max_bytes.min(self.pending.len());
        Ok(self.pending.drain(..n).collect())
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}

/// A port that opens fine but never answers
struct SilentPort(String);

impl Transport for SilentPort {
    fn port_name(&self) -> &str {
        &self.0
    }
    fn send(&mut self, _bytes: &[u8]) -> Result<(), ProtocolError> {
        Ok(())
    }
    fn receive(&mut self, _max_bytes: usize) -> Result<Vec<u8>, ProtocolError> {
        Ok(Vec::new())
    }
    fn close(&mut self) {}
}

/// Port set with one simulated module among dead ports
///
/// `COM1` cannot be opened, `COM2` opens but stays silent and `COM3` has
/// the module.
#[derive(Debug, Clone, Default)]
pub struct DemoPorts {
    module: ModuleHandle,
}

impl DemoPorts {
    /// Port the module answers on
    pub const MODULE_PORT: &'static str = "COM3";

    /// Ports around `module`
    pub fn new(module: ModuleHandle) -> Self {
        Self { module }
    }

    /// The simulated module
    pub fn module(&self) -> &ModuleHandle {
        &self.module
    }
}

impl PortOpener for DemoPorts {
    fn candidates(&self) -> Vec<String> {
        ["COM1", "COM2", Self::MODULE_PORT]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn open(&self, name: &str) -> Result<Box<dyn Transport>, ProtocolError> {
        match name {
            Self::MODULE_PORT => Ok(Box::new(SimulatedModule::new(name, self.module.clone()))),
            "COM2" => Ok(Box::new(SilentPort(name.to_string()))),
            _ => Err(ProtocolError::PortUnavailable {
                port: name.to_string(),
                reason: "access denied".to_string(),
            }),
        }
    }
}

/// Laptop battery driven by the simulated outlet
pub struct DemoBattery {
    module: ModuleHandle,
    percent: f64,
    /// Percentage points gained or lost per sample
    rate: f64,
    rng: StdRng,
}

impl DemoBattery {
    /// Battery at `start_percent` with random jitter
    pub fn new(module: ModuleHandle, start_percent: f64) -> Self {
        Self {
            module,
            percent: start_percent.clamp(0.0, 100.0),
            rate: 1.5,
            rng: StdRng::from_entropy(),
        }
    }

    /// Fixed seed and rate, for reproducible runs
    pub fn seeded(module: ModuleHandle, start_percent: f64, rate: f64, seed: u64) -> Self {
        Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
            ..Self::new(module, start_percent)
        }
    }

    /// Current charge
    pub fn percent(&self) -> f64 {
        self.percent
    }
}

impl PowerSource for DemoBattery {
    fn sample(&mut self) -> Result<PowerSample, PowerError> {
        let charging = self.module.outlet_on();
        let jitter: f64 = self.rng.gen_range(-0.25..=0.25);
        let delta = if charging { self.rate } else { -self.rate };
        self.percent = (self.percent + delta + jitter).clamp(0.0, 100.0);

        let line = if charging {
            LineStatus::Online
        } else {
            LineStatus::Offline
        };
        Ok(PowerSample::new(line, Some(self.percent.round() as u8)))
    }
}
