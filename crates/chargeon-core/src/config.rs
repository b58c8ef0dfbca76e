//! Persisted application settings
//!
//! Settings are loaded all-or-nothing: a file that is missing, unreadable or
//! lacks any single field yields the complete set of defaults.

use std::fs;
use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::outlet::OutletProfile;

/// Allowed range for the lower threshold
pub const MIN_THRESHOLD_RANGE: RangeInclusive<u8> = 20..=95;
/// Allowed range for the upper threshold
pub const MAX_THRESHOLD_RANGE: RangeInclusive<u8> = 25..=100;
/// Smallest distance kept between the two thresholds
pub const THRESHOLD_GAP: u8 = 2;

/// Errors from a configuration store
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No settings have been saved yet
    #[error("Settings file {0} does not exist")]
    Missing(PathBuf),

    /// Reading or writing the settings file failed
    #[error("Could not access {path}: {source}")]
    Io {
        /// Settings file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The settings file is not a complete settings document
    #[error("Invalid settings in {path}: {source}")]
    Parse {
        /// Settings file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// The platform has no per-user configuration directory
    #[error("No configuration directory available on this platform")]
    NoConfigDir,
}

/// Everything the host application persists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppConfig {
    /// Window position, kept so a desktop front end can restore it
    pub app_x: i32,
    /// See `app_x`
    pub app_y: i32,
    /// Stop charging at this percentage
    pub charge_max_pct: u8,
    /// Start charging at this percentage
    pub charge_min_pct: u8,
    /// Seconds between battery checks
    pub check_interval_sec: u32,
    /// Outlet codes and timing sent to the module
    pub outlet: OutletProfile,
    /// Log the battery state on every check instead of only on change
    pub update_every_check: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_x: 50,
            app_y: 50,
            charge_max_pct: 100,
            charge_min_pct: 20,
            check_interval_sec: 2,
            outlet: OutletProfile::default(),
            update_every_check: true,
        }
    }
}

impl AppConfig {
    /// Time between battery checks, never below one second
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.check_interval_sec.max(1)))
    }

    /// Stored thresholds, clamped into their valid ranges
    pub fn thresholds(&self) -> ChargeThresholds {
        ChargeThresholds::new(self.charge_min_pct, self.charge_max_pct)
    }

    /// Store both ends of `thresholds`
    pub fn set_thresholds(&mut self, thresholds: ChargeThresholds) {
        self.charge_min_pct = thresholds.min();
        self.charge_max_pct = thresholds.max();
    }
}

/// Hysteresis band for the charge controller
///
/// Editing one end pushes the other away when they get closer than
/// [`THRESHOLD_GAP`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeThresholds {
    min: u8,
    max: u8,
}

impl Default for ChargeThresholds {
    fn default() -> Self {
        AppConfig::default().thresholds()
    }
}

impl ChargeThresholds {
    /// Build from stored values, clamping both into range
    pub fn new(min: u8, max: u8) -> Self {
        let mut thresholds = Self {
            min: clamp(min, &MIN_THRESHOLD_RANGE),
            max: clamp(max, &MAX_THRESHOLD_RANGE),
        };
        if thresholds.max < thresholds.min + THRESHOLD_GAP {
            thresholds.max = thresholds.min + THRESHOLD_GAP;
        }
        thresholds
    }

    /// Start charging at or below this percentage
    pub fn min(&self) -> u8 {
        self.min
    }

    /// Stop charging at or above this percentage
    pub fn max(&self) -> u8 {
        self.max
    }

    /// Change the lower threshold, raising the upper one if needed
    pub fn set_min(&mut self, value: u8) {
        self.min = clamp(value, &MIN_THRESHOLD_RANGE);
        if self.max < self.min + THRESHOLD_GAP {
            self.max = self.min + THRESHOLD_GAP;
        }
    }

    /// Change the upper threshold, lowering the lower one if needed
    pub fn set_max(&mut self, value: u8) {
        self.max = clamp(value, &MAX_THRESHOLD_RANGE);
        if self.max < self.min + THRESHOLD_GAP {
            self.min = self.max - THRESHOLD_GAP;
        }
    }
}

fn clamp(value: u8, range: &RangeInclusive<u8>) -> u8 {
    value.clamp(*range.start(), *range.end())
}

/// Where settings are loaded from and saved to
pub trait ConfigStore: Send {
    /// Load the whole settings document
    fn load(&self) -> Result<AppConfig, ConfigError>;
    /// Replace the stored settings with `config`
    fn save(&self, config: &AppConfig) -> Result<(), ConfigError>;
}

/// Load settings, falling back to defaults for everything on any failure
pub fn load_or_default(store: &dyn ConfigStore) -> AppConfig {
    match store.load() {
        Ok(config) => config,
        Err(ConfigError::Missing(path)) => {
            tracing::info!("no settings at {}, using defaults", path.display());
            AppConfig::default()
        }
        Err(e) => {
            tracing::warn!("{}; using default settings", e);
            AppConfig::default()
        }
    }
}

/// Pretty-printed JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store settings in `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/ChargeOn/settings.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("ChargeOn").join("settings.json"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Store at [`JsonFileStore::default_path`]
    pub fn at_default_location() -> Result<Self, ConfigError> {
        Self::default_path().map(Self::new)
    }

    /// Settings file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> Result<AppConfig, ConfigError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing(self.path.clone()))
            }
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let content = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, content).map_err(|e| self.io_error(e))?;
        tracing::debug!("saved settings to {}", self.path.display());
        Ok(())
    }
}
