//! Battery and AC line status
//!
//! The controller only needs a line state and a charge percentage. Where those
//! come from is behind [`PowerSource`].

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether the AC adapter is supplying power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineStatus {
    /// Plugged in, battery charging (or full)
    Online,
    /// Running on battery
    Offline,
    /// Not reported by the system
    Unknown,
}

impl LineStatus {
    /// Online or offline
    pub fn is_known(self) -> bool {
        !matches!(self, LineStatus::Unknown)
    }

    /// Text shown next to the charge percentage
    pub fn describe(self) -> &'static str {
        match self {
            LineStatus::Online => "Charging...",
            LineStatus::Offline => "Discharging...",
            LineStatus::Unknown => "Line status unknown",
        }
    }
}

/// One reading of the power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerSample {
    /// AC adapter state
    pub line: LineStatus,
    /// Battery charge in percent (0..=100), `None` when unknown
    pub battery_percent: Option<u8>,
}

impl PowerSample {
    /// Percentages above 100 are treated as unknown
    pub fn new(line: LineStatus, battery_percent: Option<u8>) -> Self {
        Self {
            line,
            battery_percent: battery_percent.filter(|pct| *pct <= 100),
        }
    }

    /// Known line status and known percentage
    pub fn is_complete(&self) -> bool {
        self.line.is_known() && self.battery_percent.is_some()
    }
}

impl fmt::Display for PowerSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.battery_percent {
            Some(pct) => write!(f, "{}%   {}", pct, self.line.describe()),
            None => write!(f, "??%   {}", self.line.describe()),
        }
    }
}

/// Errors while collecting a power sample
#[derive(Error, Debug)]
pub enum PowerError {
    /// No supply directory was found
    #[error("No power supply information under {0}")]
    NoSupplies(PathBuf),

    /// An attribute file could not be read
    #[error("Could not read {path}: {source}")]
    Read {
        /// Attribute file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The source cannot produce a sample right now
    #[error("Power source unavailable: {0}")]
    Unavailable(String),
}

/// Something that can report battery and line status
pub trait PowerSource: Send {
    /// Take one reading
    fn sample(&mut self) -> Result<PowerSample, PowerError>;
}

/// Linux power supply class reader
///
/// Looks for a `Mains` supply (its `online` attribute gives the line status)
/// and a `Battery` supply (its `capacity` attribute gives the percentage).
/// A missing mains supply with a battery reporting `Charging` or `Full`
/// still counts as online.
#[derive(Debug, Clone)]
pub struct SysfsPowerSource {
    root: PathBuf,
}

impl Default for SysfsPowerSource {
    fn default() -> Self {
        Self::new("/sys/class/power_supply")
    }
}

impl SysfsPowerSource {
    /// Read supplies under `root` instead of the system location
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the supply entries
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn read_attr(dir: &Path, name: &str) -> Result<Option<String>, PowerError> {
    let path = dir.join(name);
    match fs::read_to_string(&path) {
        Ok(text) => Ok(Some(text.trim().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PowerError::Read { path, source }),
    }
}

impl PowerSource for SysfsPowerSource {
    fn sample(&mut self) -> Result<PowerSample, PowerError> {
        let entries = fs::read_dir(&self.root).map_err(|source| PowerError::Read {
            path: self.root.clone(),
            source,
        })?;

        let mut dirs: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        dirs.sort();
        if dirs.is_empty() {
            return Err(PowerError::NoSupplies(self.root.clone()));
        }

        let mut mains_online = None;
        let mut battery_percent = None;
        let mut battery_status = None;

        for dir in &dirs {
            match read_attr(dir, "type")?.as_deref() {
                Some("Mains") if mains_online.is_none() => {
                    mains_online = read_attr(dir, "online")?.map(|v| v == "1");
                }
                Some("Battery") if battery_percent.is_none() => {
                    battery_percent = read_attr(dir, "capacity")?.and_then(|v| v.parse::<u8>().ok());
                    battery_status = read_attr(dir, "status")?;
                }
                _ => {}
            }
        }

        let line = match (mains_online, battery_status.as_deref()) {
            (Some(true), _) => LineStatus::Online,
            (Some(false), _) => LineStatus::Offline,
            (None, Some("Charging" | "Full")) => LineStatus::Online,
            (None, Some("Discharging")) => LineStatus::Offline,
            _ => LineStatus::Unknown,
        };

        Ok(PowerSample::new(line, battery_percent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn supply(root: &Path, name: &str, attrs: &[(&str, &str)]) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for (key, value) in attrs {
            fs::write(dir.join(key), format!("{}\n", value)).unwrap();
        }
    }

    #[test]
    fn test_mains_and_battery() {
        let tmp = TempDir::new().unwrap();
        supply(tmp.path(), "AC", &[("type", "Mains"), ("online", "1")]);
        supply(
            tmp.path(),
            "BAT0",
            &[("type", "Battery"), ("capacity", "87"), ("status", "Charging")],
        );

        let sample = SysfsPowerSource::new(tmp.path()).sample().unwrap();
        assert_eq!(sample, PowerSample::new(LineStatus::Online, Some(87)));
        assert!(sample.is_complete());
    }

    #[test]
    fn test_battery_status_fallback() {
        let tmp = TempDir::new().unwrap();
        supply(
            tmp.path(),
            "BAT1",
            &[("type", "Battery"), ("capacity", "42"), ("status", "Discharging")],
        );

        let sample = SysfsPowerSource::new(tmp.path()).sample().unwrap();
        assert_eq!(sample.line, LineStatus::Offline);
        assert_eq!(sample.battery_percent, Some(42));
    }

    #[test]
    fn test_no_battery_is_unknown_percent() {
        let tmp = TempDir::new().unwrap();
        supply(tmp.path(), "ACAD", &[("type", "Mains"), ("online", "0")]);

        let sample = SysfsPowerSource::new(tmp.path()).sample().unwrap();
        assert_eq!(sample.battery_percent, None);
        assert!(!sample.is_complete());
    }

    #[test]
    fn test_empty_root_fails() {
        let tmp = TempDir::new().unwrap();
        let err = SysfsPowerSource::new(tmp.path()).sample().unwrap_err();
        assert!(matches!(err, PowerError::NoSupplies(_)));
    }

    #[test]
    fn test_out_of_range_percent_is_unknown() {
        let sample = PowerSample::new(LineStatus::Online, Some(255));
        assert_eq!(sample.battery_percent, None);
    }

    #[test]
    fn test_display() {
        let sample = PowerSample::new(LineStatus::Offline, Some(7));
        assert_eq!(sample.to_string(), "7%   Discharging...");
    }
}
