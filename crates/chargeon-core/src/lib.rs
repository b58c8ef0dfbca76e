//! # ChargeOn Core Library
//!
//! Battery-aware control of an RF power outlet through a ChargeOn module.
//!
//! This library provides:
//! - Discovery of the module among the host's serial ports
//! - The module's marker protocol, one exchange at a time
//! - Outlet profiles and their settings payload
//! - A hysteresis charge controller with sticky ON/OFF commands
//! - Learn mode for capturing codes from the outlet's remote control
//! - Settings persistence and battery status sources
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chargeon_core::prelude::*;
//!
//! let engine = Arc::new(ProtocolEngine::default());
//! let mut station = Station::new(
//!     engine,
//!     Box::new(SystemPorts::default()),
//!     Box::new(SysfsPowerSource::default()),
//!     Box::new(JsonFileStore::at_default_location()?),
//! );
//! station.startup()?;
//! loop {
//!     station.tick();
//!     std::thread::sleep(station.config().check_interval());
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod control;
pub mod demo;
pub mod learn;
pub mod outlet;
pub mod power;
pub mod protocol;
pub mod station;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{AppConfig, ChargeThresholds, ConfigStore, JsonFileStore};
    pub use crate::control::{ChargeController, Decision, OutletSwitch};
    pub use crate::learn::{LearnOutcome, LearnPrompt, RemoteButton};
    pub use crate::outlet::OutletProfile;
    pub use crate::power::{LineStatus, PowerSample, PowerSource, SysfsPowerSource};
    pub use crate::protocol::{ExchangeKind, ExchangeTiming, ProtocolEngine, ProtocolError, SystemPorts};
    pub use crate::station::{Station, StationStatus, TickOutcome};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
