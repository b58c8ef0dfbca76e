//! Learn mode
//!
//! Two captures from the outlet's own remote control: first the ON button,
//! then the OFF button. The user is walked through it by a [`LearnPrompt`].

use std::fmt;

use crate::outlet::OutletProfile;
use crate::protocol::{ProtocolEngine, ProtocolError};

/// Remote control button being captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteButton {
    /// The remote's ON button
    On,
    /// The remote's OFF button
    Off,
}

impl fmt::Display for RemoteButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemoteButton::On => "ON",
            RemoteButton::Off => "OFF",
        })
    }
}

/// User interaction during learn mode
pub trait LearnPrompt {
    /// Ask the user to start pressing `button`. `false` cancels.
    fn ready(&mut self, button: RemoteButton) -> bool;

    /// Report a failed capture. `true` tries the same button again.
    fn capture_failed(&mut self, button: RemoteButton, error: &ProtocolError) -> bool;

    /// Show the captured profile. `true` replaces the current outlet settings.
    fn confirm(&mut self, captured: &OutletProfile) -> bool;
}

/// Something that can capture a code from a remote control
pub trait CodeCapture {
    /// Listen for one button press and merge what was heard into `base`
    fn capture(&self, base: OutletProfile) -> Result<OutletProfile, ProtocolError>;
}

impl CodeCapture for ProtocolEngine {
    fn capture(&self, base: OutletProfile) -> Result<OutletProfile, ProtocolError> {
        self.learn_code(base)
    }
}

/// How a learn session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnOutcome {
    /// Both codes captured and accepted by the user
    Captured(OutletProfile),
    /// The user backed out; nothing changed
    Cancelled,
}

fn capture_button(
    capture: &dyn CodeCapture,
    base: OutletProfile,
    button: RemoteButton,
    prompt: &mut dyn LearnPrompt,
) -> Result<Option<OutletProfile>, ProtocolError> {
    loop {
        if !prompt.ready(button) {
            return Ok(None);
        }
        match capture.capture(base) {
            Ok(profile) => {
                tracing::info!(
                    "captured {} code {} (protocol {}, pulse {}, {} bits)",
                    button,
                    profile.off_code,
                    profile.protocol,
                    profile.pulse_length,
                    profile.value_length
                );
                return Ok(Some(profile));
            }
            Err(e) => {
                tracing::warn!("capture of {} code failed: {}", button, e);
                if !prompt.capture_failed(button, &e) {
                    return Err(e);
                }
            }
        }
    }
}

/// Capture ON and OFF codes on top of `current`.
///
/// Fields the module does not report (pulse repeats, restore flag) are kept
/// from `current`. Nothing is committed here: the caller stores the profile
/// from [`LearnOutcome::Captured`].
pub fn learn_codes(
    capture: &dyn CodeCapture,
    current: OutletProfile,
    prompt: &mut dyn LearnPrompt,
) -> Result<LearnOutcome, ProtocolError> {
    let Some(on) = capture_button(capture, current, RemoteButton::On, prompt)? else {
        return Ok(LearnOutcome::Cancelled);
    };
    let Some(off) = capture_button(capture, on, RemoteButton::Off, prompt)? else {
        return Ok(LearnOutcome::Cancelled);
    };

    let learned = OutletProfile {
        on_code: on.on_code,
        ..off
    };
    if !learned.is_complete_capture() {
        return Err(ProtocolError::CaptureFailed);
    }

    if prompt.confirm(&learned) {
        Ok(LearnOutcome::Captured(learned))
    } else {
        Ok(LearnOutcome::Cancelled)
    }
}
