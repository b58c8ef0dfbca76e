use chargeon_core::config::{AppConfig, ChargeThresholds, ConfigStore, JsonFileStore};
use chargeon_core::control::Decision;
use chargeon_core::demo::{DemoBattery, DemoPorts, ModuleHandle};
use chargeon_core::learn::{LearnOutcome, LearnPrompt, RemoteButton};
use chargeon_core::outlet::OutletProfile;
use chargeon_core::protocol::{ExchangeKind, ExchangeTiming, ProtocolEngine, ProtocolError};
use chargeon_core::station::{Station, TickOutcome, STATUS_DISABLED};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness; set RUST_LOG to see it
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn demo_station(dir: &TempDir, module: &ModuleHandle, start_percent: f64) -> Station {
    Station::new(
        Arc::new(ProtocolEngine::new(ExchangeTiming::immediate())),
        Box::new(DemoPorts::new(module.clone())),
        Box::new(DemoBattery::seeded(module.clone(), start_percent, 4.0, 42)),
        Box::new(JsonFileStore::new(dir.path().join("settings.json"))),
    )
}

/// Presses the remote on cue and accepts whatever was captured
struct AlwaysYes {
    asked: Vec<RemoteButton>,
}

impl LearnPrompt for AlwaysYes {
    fn ready(&mut self, button: RemoteButton) -> bool {
        self.asked.push(button);
        true
    }
    fn capture_failed(&mut self, _button: RemoteButton, _error: &ProtocolError) -> bool {
        false
    }
    fn confirm(&mut self, _captured: &OutletProfile) -> bool {
        true
    }
}

#[test]
fn test_battery_cycles_between_thresholds() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let module = ModuleHandle::default();
    let mut station = demo_station(&dir, &module, 50.0);
    station.set_thresholds(ChargeThresholds::new(40, 60));
    station.startup().unwrap();

    let mut decisions = Vec::new();
    for _ in 0..60 {
        let TickOutcome::Completed(summary) = station.tick() else {
            panic!("tick skipped with no other caller");
        };
        let pct = summary.sample.and_then(|s| s.battery_percent).unwrap();
        assert!((34..=66).contains(&pct), "battery drifted to {}%", pct);
        decisions.push(summary.control.unwrap().decision);
    }

    assert!(decisions.contains(&Decision::TurnOff));
    assert!(decisions.contains(&Decision::TurnOn));
}

#[test]
fn test_settings_persist_across_restart() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let module = ModuleHandle::default();

    let mut station = demo_station(&dir, &module, 80.0);
    station.startup().unwrap();
    station.set_thresholds(ChargeThresholds::new(30, 70));
    station.shutdown(false).unwrap();

    let saved = JsonFileStore::new(dir.path().join("settings.json")).load().unwrap();
    assert_eq!(saved.charge_min_pct, 30);
    assert_eq!(saved.outlet, module.state().eeprom);

    // A configured outlet is pushed as-is, without an EEPROM read
    module.state().received.clear();
    let mut station = demo_station(&dir, &module, 80.0);
    assert_eq!(station.config().thresholds(), ChargeThresholds::new(30, 70));
    station.startup().unwrap();
    assert_eq!(
        module.state().received,
        vec![ExchangeKind::Presence, ExchangeKind::PushSettings]
    );
}

#[test]
fn test_corrupt_settings_fall_back_to_defaults() {
    init_logging();
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("settings.json"), "{\"ChargeMaxPct\": 80}").unwrap();
    let module = ModuleHandle::default();
    let station = demo_station(&dir, &module, 50.0);
    assert_eq!(*station.config(), AppConfig::default());
}

#[test]
fn test_learn_replaces_codes_and_pushes() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let module = ModuleHandle::default();
    let mut station = demo_station(&dir, &module, 50.0);
    station.startup().unwrap();

    module.script_learn(&[1361, 1364]);
    let mut prompt = AlwaysYes { asked: Vec::new() };
    let outcome = station.learn(&mut prompt).unwrap();

    let LearnOutcome::Captured(profile) = outcome else {
        panic!("learn was cancelled");
    };
    assert_eq!(prompt.asked, vec![RemoteButton::On, RemoteButton::Off]);
    assert_eq!((profile.on_code, profile.off_code), (1361, 1364));
    assert_eq!(station.config().outlet, profile);
    assert_eq!(module.state().working, profile);
}

#[test]
fn test_learn_failure_keeps_previous_profile() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let module = ModuleHandle::default();
    let mut station = demo_station(&dir, &module, 50.0);
    station.startup().unwrap();
    let before = station.config().outlet;

    // Only the ON button was captured
    module.script_learn(&[1361]);
    let err = station.learn(&mut AlwaysYes { asked: Vec::new() }).unwrap_err();
    assert!(matches!(err, ProtocolError::CaptureFailed));
    assert_eq!(station.config().outlet, before);
}

#[test]
fn test_no_module_means_monitor_only() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let module = ModuleHandle::default();
    module.set_unresponsive(true);
    let mut station = demo_station(&dir, &module, 50.0);

    assert!(matches!(station.startup(), Err(ProtocolError::NotFound { .. })));
    let TickOutcome::Completed(summary) = station.tick() else {
        panic!("tick skipped");
    };
    assert!(summary.sample.is_some());
    assert!(summary.control.is_none());
    assert_eq!(station.status().link, STATUS_DISABLED);

    // Manual switching reports the missing link instead of panicking
    assert!(matches!(station.switch_outlet(true), Err(ProtocolError::NotConnected)));
}

#[test]
fn test_manual_switch_and_version() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let module = ModuleHandle::default();
    let mut station = demo_station(&dir, &module, 50.0);
    station.startup().unwrap();

    station.switch_outlet(false).unwrap();
    assert!(!module.outlet_on());
    assert!(station.controller().is_commanding_off());
    assert_eq!(station.status().activity, "Turning outlet OFF");

    assert_eq!(station.firmware_version().unwrap(), "0.8.07");
    station.show_settings().unwrap();
}
