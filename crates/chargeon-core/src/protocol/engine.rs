//! Exchange engine
//!
//! Owns the discovered transport and runs write/settle/read exchanges on it,
//! one at a time.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use super::codec::{apply_settings, encode_settings, parse_build};
use super::serial::{self, PortOpener, Transport};
use super::{ExchangeKind, ProtocolError, DEFAULT_BAUD_RATE, MAX_RESPONSE_SIZE, REFERENCE_BAUD_RATE};
use crate::outlet::OutletProfile;

/// Timing budget for exchanges.
///
/// These values were tuned against the module's actual response latency; the
/// engine never relies on OS read timeouts.
#[derive(Debug, Clone)]
pub struct ExchangeTiming {
    /// Link speed used to scale settle times
    pub baud_rate: u32,
    /// Wait before the single retry when another exchange holds the slot
    pub busy_backoff: Duration,
    /// Relay settle time after a confirmed ON
    pub outlet_on_settle: Duration,
    /// Relay settle time after a confirmed OFF
    pub outlet_off_settle: Duration,
    /// How long the module listens for a remote control during LEARN
    pub capture_window: Duration,
    /// Extra wait after the capture window before reading the result
    pub capture_margin: Duration,
}

impl Default for ExchangeTiming {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            busy_backoff: Duration::from_millis(50),
            outlet_on_settle: Duration::from_millis(1250),
            outlet_off_settle: Duration::from_millis(250),
            capture_window: Duration::from_secs(3),
            capture_margin: Duration::from_millis(200),
        }
    }
}

impl ExchangeTiming {
    /// No waiting at all, for in-process simulated modules
    pub fn immediate() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            busy_backoff: Duration::ZERO,
            outlet_on_settle: Duration::ZERO,
            outlet_off_settle: Duration::ZERO,
            capture_window: Duration::ZERO,
            capture_margin: Duration::ZERO,
        }
    }

    /// Time to wait between writing a request and reading its response
    pub fn settle_time(&self, kind: ExchangeKind, request_len: usize) -> Duration {
        // One millisecond per byte at 115200 baud, proportionally longer when slower
        let baud = u64::from(self.baud_rate.max(1));
        let per_request_ms = request_len as u64 * u64::from(REFERENCE_BAUD_RATE) / baud;

        match kind {
            ExchangeKind::LearnCode => self.capture_window + self.capture_margin,
            ExchangeKind::ReadNonvolatile => Duration::from_millis(per_request_ms * 2),
            _ => Duration::from_millis(per_request_ms),
        }
    }

    /// Time the outlet relay needs after a confirmed switch
    pub fn relay_settle(&self, kind: ExchangeKind) -> Duration {
        match kind {
            ExchangeKind::OutletOn => self.outlet_on_settle,
            ExchangeKind::OutletOff => self.outlet_off_settle,
            _ => Duration::ZERO,
        }
    }
}

type Link = Option<Box<dyn Transport>>;

/// Exclusive hold on the link for the duration of one exchange
struct ExchangeSlot<'a> {
    link: MutexGuard<'a, Link>,
    busy: &'a AtomicBool,
}

impl Deref for ExchangeSlot<'_> {
    type Target = Link;

    fn deref(&self) -> &Link {
        &self.link
    }
}

impl DerefMut for ExchangeSlot<'_> {
    fn deref_mut(&mut self) -> &mut Link {
        &mut self.link
    }
}

impl Drop for ExchangeSlot<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Protocol engine for one ChargeOn module
pub struct ProtocolEngine {
    link: Mutex<Link>,
    port_name: Mutex<Option<String>>,
    busy: AtomicBool,
    timing: ExchangeTiming,
}

impl Default for ProtocolEngine {
    fn default() -> Self {
        Self::new(ExchangeTiming::default())
    }
}

impl ProtocolEngine {
    /// Create an engine with no module attached
    pub fn new(timing: ExchangeTiming) -> Self {
        Self {
            link: Mutex::new(None),
            port_name: Mutex::new(None),
            busy: AtomicBool::new(false),
            timing,
        }
    }

    /// Create an engine already bound to `transport` (no presence check)
    pub fn with_transport(timing: ExchangeTiming, transport: Box<dyn Transport>) -> Self {
        let name = transport.port_name().to_string();
        Self {
            link: Mutex::new(Some(transport)),
            port_name: Mutex::new(Some(name)),
            busy: AtomicBool::new(false),
            timing,
        }
    }

    /// Timing budget in use
    pub fn timing(&self) -> &ExchangeTiming {
        &self.timing
    }

    /// True while an exchange (or a discovery) holds the slot
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Name of the port the module was found on
    pub fn port_name(&self) -> Option<String> {
        lock(&self.port_name).clone()
    }

    /// Whether a module is attached
    pub fn is_connected(&self) -> bool {
        lock(&self.port_name).is_some()
    }

    fn try_acquire(&self) -> Option<ExchangeSlot<'_>> {
        let link = match self.link.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        self.busy.store(true, Ordering::SeqCst);
        Some(ExchangeSlot {
            link,
            busy: &self.busy,
        })
    }

    /// Take the slot, backing off once if it is held
    fn acquire(&self) -> Result<ExchangeSlot<'_>, ProtocolError> {
        if let Some(slot) = self.try_acquire() {
            return Ok(slot);
        }
        tracing::debug!("exchange slot busy, retrying in {:?}", self.timing.busy_backoff);
        std::thread::sleep(self.timing.busy_backoff);
        self.try_acquire().ok_or(ProtocolError::Busy)
    }

    /// Probe `opener`'s candidates for a module and attach the first one found.
    ///
    /// Any previously attached transport is closed first. The slot is held for
    /// the whole probe.
    pub fn discover(&self, opener: &dyn PortOpener) -> Result<String, ProtocolError> {
        let mut slot = self.acquire()?;
        if let Some(mut old) = slot.take() {
            old.close();
        }
        *lock(&self.port_name) = None;

        let timing = &self.timing;
        let wake = ExchangeKind::Presence.request().as_bytes();
        let transport = serial::discover(opener, |t| {
            transact(t, ExchangeKind::Presence, wake, timing).map(|_| ())
        })?;

        let name = transport.port_name().to_string();
        *slot = Some(transport);
        *lock(&self.port_name) = Some(name.clone());
        Ok(name)
    }

    /// Detach and close the transport
    pub fn close(&self) -> Result<(), ProtocolError> {
        let mut slot = self.acquire()?;
        if let Some(mut transport) = slot.take() {
            transport.close();
            tracing::info!("closed link on {}", transport.port_name());
        }
        *lock(&self.port_name) = None;
        Ok(())
    }

    /// Run one exchange and return the raw response (marker included).
    ///
    /// `payload` is required for [`ExchangeKind::PushSettings`] and ignored
    /// otherwise. Failures are reported as-is; nothing is retried here.
    pub fn exchange(
        &self,
        kind: ExchangeKind,
        payload: Option<&OutletProfile>,
    ) -> Result<Vec<u8>, ProtocolError> {
        let request = match (kind.sends_payload(), payload) {
            (true, Some(profile)) => encode_settings(profile).into_bytes(),
            (true, None) => return Err(ProtocolError::MissingPayload(kind.label())),
            (false, _) => kind.request().as_bytes().to_vec(),
        };

        let mut slot = self.acquire()?;
        let transport = slot.as_deref_mut().ok_or(ProtocolError::NotConnected)?;
        transact(transport, kind, &request, &self.timing)
    }

    /// PRESENCE-CHECK on the attached module
    pub fn presence(&self) -> Result<(), ProtocolError> {
        self.exchange(ExchangeKind::Presence, None).map(|_| ())
    }

    /// HEARTBEAT on the attached module
    pub fn heartbeat(&self) -> Result<(), ProtocolError> {
        self.exchange(ExchangeKind::Heartbeat, None).map(|_| ())
    }

    /// Switch the outlet and wait for the relay to settle
    pub fn switch_outlet(&self, on: bool) -> Result<(), ProtocolError> {
        let kind = if on {
            ExchangeKind::OutletOn
        } else {
            ExchangeKind::OutletOff
        };
        self.exchange(kind, None).map(|_| ())
    }

    /// Replace the module's working outlet settings
    pub fn push_settings(&self, profile: &OutletProfile) -> Result<(), ProtocolError> {
        self.exchange(ExchangeKind::PushSettings, Some(profile))
            .map(|_| ())
    }

    /// Ask the module to print its outlet settings on its debug port
    pub fn show_settings(&self) -> Result<(), ProtocolError> {
        self.exchange(ExchangeKind::ShowSettings, None).map(|_| ())
    }

    /// Read the outlet settings stored in the module's EEPROM on top of `base`
    pub fn read_nonvolatile(&self, base: OutletProfile) -> Result<OutletProfile, ProtocolError> {
        let response = self.exchange(ExchangeKind::ReadNonvolatile, None)?;
        Ok(apply_settings(base, &String::from_utf8_lossy(&response)))
    }

    /// Capture one code from a remote control.
    ///
    /// The module listens for the capture window, then reports `Code`,
    /// `Pro`, `PLen` and `VLen`. The captured code is written to both the
    /// on- and off-code of the returned profile.
    pub fn learn_code(&self, base: OutletProfile) -> Result<OutletProfile, ProtocolError> {
        let response = self.exchange(ExchangeKind::LearnCode, None)?;
        let captured = apply_settings(base, &String::from_utf8_lossy(&response));
        if !captured.is_complete_capture() {
            tracing::warn!("incomplete capture: {:?}", captured);
            return Err(ProtocolError::CaptureFailed);
        }
        Ok(captured)
    }

    /// Firmware build string of the attached module
    pub fn firmware_version(&self) -> Result<String, ProtocolError> {
        let kind = ExchangeKind::FirmwareVersion;
        let response = self.exchange(kind, None)?;
        let text = String::from_utf8_lossy(&response);
        parse_build(&text).ok_or_else(|| ProtocolError::UnexpectedResponse {
            exchange: kind.label(),
            expected: kind.response(),
            actual: text.into_owned(),
        })
    }
}

/// Write `request`, wait the settle time, read and check the response.
fn transact(
    transport: &mut dyn Transport,
    kind: ExchangeKind,
    request: &[u8],
    timing: &ExchangeTiming,
) -> Result<Vec<u8>, ProtocolError> {
    let expected = kind.response();
    let label = kind.label();

    tracing::debug!(
        "{}: sending {:?} on {}",
        label,
        String::from_utf8_lossy(request),
        transport.port_name()
    );
    transport.send(request)?;

    std::thread::sleep(timing.settle_time(kind, request.len()));

    let want = if kind.returns_payload() {
        MAX_RESPONSE_SIZE
    } else {
        expected.len()
    };
    let response = read_available(transport, want)?;
    tracing::debug!("{}: received {:?}", label, String::from_utf8_lossy(&response));

    if response.is_empty() {
        return Err(ProtocolError::Timeout { exchange: label });
    }
    if !response.starts_with(expected.as_bytes()) {
        return Err(ProtocolError::UnexpectedResponse {
            exchange: label,
            expected,
            actual: String::from_utf8_lossy(&response).into_owned(),
        });
    }

    let relay = timing.relay_settle(kind);
    if !relay.is_zero() {
        std::thread::sleep(relay);
    }
    Ok(response)
}

/// Collect up to `want` bytes that the module has already sent
fn read_available(transport: &mut dyn Transport, want: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut response = Vec::with_capacity(want);
    while response.len() < want {
        let chunk = transport.receive(want - response.len())?;
        if chunk.is_empty() {
            break;
        }
        response.extend_from_slice(&chunk);
    }
    Ok(response)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
