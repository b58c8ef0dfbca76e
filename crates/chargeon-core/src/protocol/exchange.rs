//! Exchange vocabulary
//!
//! The fixed set of messages understood by the ChargeOn module firmware.

use serde::{Deserialize, Serialize};

/// One request/response interaction with the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeKind {
    /// Presence check used during discovery (`<CO_WAKE>`)
    Presence,

    /// Switch the outlet on (`<CO_ON>`)
    OutletOn,

    /// Switch the outlet off (`<CO_OFF>`)
    OutletOff,

    /// Link health check (`<CO_BEAT>`)
    Heartbeat,

    /// Replace the module's working outlet settings (`<CO_SETTINGS>` + payload)
    PushSettings,

    /// Ask the module to print its outlet settings on its debug port (`<CO_OUTLET>`)
    ShowSettings,

    /// Capture a code from a physical remote control (`<CO_LEARN>`)
    LearnCode,

    /// Read the firmware build string (`<CO_VERSION>`)
    FirmwareVersion,

    /// Read the outlet settings stored in the module's EEPROM (`<CO_EEPROM>`)
    ReadNonvolatile,
}

/// Static description of an exchange kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeSpec {
    /// Marker written to the module
    pub request: &'static str,
    /// Marker the response must start with
    pub response: &'static str,
    /// Short name used in status and error messages
    pub label: &'static str,
}

impl ExchangeKind {
    /// Every exchange kind, in wire-table order
    pub const ALL: [ExchangeKind; 9] = [
        ExchangeKind::Presence,
        ExchangeKind::OutletOn,
        ExchangeKind::OutletOff,
        ExchangeKind::Heartbeat,
        ExchangeKind::PushSettings,
        ExchangeKind::ShowSettings,
        ExchangeKind::LearnCode,
        ExchangeKind::FirmwareVersion,
        ExchangeKind::ReadNonvolatile,
    ];

    /// Markers and label for this exchange
    pub const fn spec(self) -> ExchangeSpec {
        let (request, response, label) = match self {
            ExchangeKind::Presence => ("<CO_WAKE>", "<CO_WAKE_OK>", "WAKE"),
            ExchangeKind::OutletOn => ("<CO_ON>", "<CO_ON_OK>", "OUTLET ON"),
            ExchangeKind::OutletOff => ("<CO_OFF>", "<CO_OFF_OK>", "OUTLET OFF"),
            ExchangeKind::Heartbeat => ("<CO_BEAT>", "<CO_BEAT_OK>", "HEARTBEAT"),
            ExchangeKind::PushSettings => ("<CO_SETTINGS>", "<CO_SETTINGS_OK>", "SETTINGS"),
            ExchangeKind::ShowSettings => ("<CO_OUTLET>", "<CO_OUTLET_OK>", "OUTLET"),
            ExchangeKind::LearnCode => ("<CO_LEARN>", "<CO_LEARN_OK>", "LEARN CODE"),
            ExchangeKind::FirmwareVersion => ("<CO_VERSION>", "<CO_VERSION_OK>", "VERSION"),
            ExchangeKind::ReadNonvolatile => ("<CO_EEPROM>", "<CO_EEPROM_OK>", "EEPROM"),
        };
        ExchangeSpec {
            request,
            response,
            label,
        }
    }

    /// Request marker
    pub const fn request(self) -> &'static str {
        self.spec().request
    }

    /// Expected response marker
    pub const fn response(self) -> &'static str {
        self.spec().response
    }

    /// Human-readable label
    pub const fn label(self) -> &'static str {
        self.spec().label
    }

    /// Whether the request carries outlet settings after the marker
    pub fn sends_payload(self) -> bool {
        matches!(self, ExchangeKind::PushSettings)
    }

    /// Whether the response carries `[key:value]` fields after the marker
    pub fn returns_payload(self) -> bool {
        matches!(
            self,
            ExchangeKind::LearnCode | ExchangeKind::FirmwareVersion | ExchangeKind::ReadNonvolatile
        )
    }

    /// Look up the kind whose request marker starts `bytes`
    pub fn from_request(bytes: &[u8]) -> Option<ExchangeKind> {
        Self::ALL
            .into_iter()
            .find(|kind| bytes.starts_with(kind.request().as_bytes()))
    }
}
