//! Outlet profile
//!
//! RF parameters and behavioural flags describing one remote-controlled outlet.

use serde::{Deserialize, Serialize};

/// Pulse repeat count used when nothing else is known about the outlet
pub const DEFAULT_PULSE_REPEATS: u32 = 4;

/// Settings for the remote outlet, as stored by the host and by the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutletProfile {
    /// RF code that switches the outlet on
    pub on_code: u32,
    /// RF code that switches the outlet off
    pub off_code: u32,
    /// RF protocol id (0 is a legitimate value)
    pub protocol: u32,
    /// Pulse length in microseconds
    pub pulse_length: u32,
    /// How many times each code is transmitted
    pub pulse_repeats: u32,
    /// Turn the outlet on before the host application exits
    pub restore_on_shutdown: bool,
    /// Code length in bits
    pub value_length: u32,
}

impl Default for OutletProfile {
    fn default() -> Self {
        Self {
            on_code: 0,
            off_code: 0,
            protocol: 0,
            pulse_length: 0,
            pulse_repeats: DEFAULT_PULSE_REPEATS,
            restore_on_shutdown: false,
            value_length: 0,
        }
    }
}

impl OutletProfile {
    /// True when every field still holds its built-in default.
    ///
    /// An unconfigured profile is never pushed blindly: the module's
    /// non-volatile copy is read first.
    pub fn is_unconfigured(&self) -> bool {
        *self == Self::default()
    }

    /// Check that a learned code is usable.
    ///
    /// Both codes, the pulse length and the value length must be non-zero.
    /// The protocol id is not checked because protocol 0 exists.
    pub fn is_complete_capture(&self) -> bool {
        self.on_code != 0 && self.off_code != 0 && self.pulse_length != 0 && self.value_length != 0
    }

    /// Apply one `key:value` field from a module response.
    ///
    /// Returns `false` for keys this profile does not know about. `Code` is what
    /// the module sends after a capture and sets both codes.
    pub fn apply_field(&mut self, key: &str, value: u32) -> bool {
        match key {
            "Code" => {
                self.on_code = value;
                self.off_code = value;
            }
            "On" => self.on_code = value,
            "Off" => self.off_code = value,
            "Pro" => self.protocol = value,
            "PLen" => self.pulse_length = value,
            "PReps" => self.pulse_repeats = value,
            "TOBQ" => self.restore_on_shutdown = value != 0,
            "VLen" => self.value_length = value,
            _ => return false,
        }
        true
    }
}
