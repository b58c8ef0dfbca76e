//! Serial port handling
//!
//! Provides low-level serial port access and module discovery.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use super::{ProtocolError, DEFAULT_BAUD_RATE, MAX_PORT_NUM};

/// Byte-oriented link to a (possible) ChargeOn module
pub trait Transport: Send {
    /// Human-readable port name (e.g. "COM3" or "/dev/ttyUSB0")
    fn port_name(&self) -> &str;

    /// Write all bytes
    fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError>;

    /// Return up to `max_bytes` that are already buffered; may be empty
    fn receive(&mut self, max_bytes: usize) -> Result<Vec<u8>, ProtocolError>;

    /// Release the underlying device. Calling it twice is harmless.
    fn close(&mut self);
}

/// Source of candidate ports for discovery
pub trait PortOpener {
    /// Candidate port identifiers, in probe order
    fn candidates(&self) -> Vec<String>;

    /// Open and configure one candidate
    fn open(&self, name: &str) -> Result<Box<dyn Transport>, ProtocolError>;
}

/// Probe candidates in order and return the first one that opens, configures
/// and passes `probe`.
///
/// Every candidate that opened but failed the probe is closed before moving on.
pub fn discover<F>(opener: &dyn PortOpener, mut probe: F) -> Result<Box<dyn Transport>, ProtocolError>
where
    F: FnMut(&mut dyn Transport) -> Result<(), ProtocolError>,
{
    let candidates = opener.candidates();
    let tried = candidates.len();

    for name in candidates {
        let mut transport = match opener.open(&name) {
            Ok(t) => t,
            Err(e) => {
                tracing::trace!("discover: skipping {}: {}", name, e);
                continue;
            }
        };

        match probe(transport.as_mut()) {
            Ok(()) => {
                tracing::info!("ChargeOn module found on {}", transport.port_name());
                return Ok(transport);
            }
            Err(e) => {
                let failure = ProtocolError::HandshakeFailed {
                    port: name.clone(),
                    reason: e.to_string(),
                };
                tracing::debug!("discover: {}", failure);
                transport.close();
            }
        }
    }

    Err(ProtocolError::NotFound { tried })
}

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key for port names:
///  - ttyACM* first (numeric suffix order)
///  - then ttyUSB* (numeric)
///  - then COM* (numeric)
///  - then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "ttyACM"), (1, "ttyUSB"), (2, "COM")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux-only: USB serial adapters can be missing from the udev listing
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo {
                        name: full,
                        vid: None,
                        pid: None,
                        product: None,
                    });
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// The host's real serial ports
#[derive(Debug, Clone)]
pub struct SystemPorts {
    /// Link speed
    pub baud_rate: u32,
    /// Candidates are limited to port numbers below this value
    pub max_port: u32,
    /// Wait after opening before the first exchange (the module resets on open)
    pub delay_after_open: Duration,
}

impl Default for SystemPorts {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            max_port: MAX_PORT_NUM,
            delay_after_open: Duration::from_millis(1500),
        }
    }
}

impl PortOpener for SystemPorts {
    #[cfg(windows)]
    fn candidates(&self) -> Vec<String> {
        (1..self.max_port).map(|n| format!("COM{}", n)).collect()
    }

    #[cfg(not(windows))]
    fn candidates(&self) -> Vec<String> {
        list_ports()
            .into_iter()
            .map(|p| p.name)
            .take(self.max_port.saturating_sub(1) as usize)
            .collect()
    }

    fn open(&self, name: &str) -> Result<Box<dyn Transport>, ProtocolError> {
        let transport = SerialTransport::open(name, self.baud_rate, self.delay_after_open)?;
        Ok(Box::new(transport))
    }
}

/// A configured serial port
pub struct SerialTransport {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open `name` exclusively, apply 8N1 at `baud_rate` and let the module settle
    pub fn open(name: &str, baud_rate: u32, settle: Duration) -> Result<Self, ProtocolError> {
        let unavailable = |e: serialport::Error| ProtocolError::PortUnavailable {
            port: name.to_string(),
            reason: e.to_string(),
        };

        // Zero timeout: reads return whatever is buffered. Response timing is
        // enforced by the engine's settle sleeps.
        let mut port = serialport::new(name, baud_rate)
            .timeout(Duration::ZERO)
            .open()
            .map_err(unavailable)?;

        configure_port(port.as_mut()).map_err(unavailable)?;

        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        port.clear(serialport::ClearBuffer::All).map_err(unavailable)?;

        tracing::debug!("opened {} at {} baud", name, baud_rate);
        Ok(Self {
            name: name.to_string(),
            port: Some(port),
        })
    }
}

impl Transport for SerialTransport {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let port = self.port.as_mut().ok_or(ProtocolError::NotConnected)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn receive(&mut self, max_bytes: usize) -> Result<Vec<u8>, ProtocolError> {
        let port = self.port.as_mut().ok_or(ProtocolError::NotConnected)?;
        let mut buf = vec![0u8; max_bytes];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(Vec::new())
            }
            Err(e) => Err(ProtocolError::Io(e)),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::debug!("closed {}", self.name);
        }
    }
}

/// Configure a serial port for the module: 8 data bits, 1 stop bit, no parity
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), serialport::Error> {
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;

    // Keep DTR asserted so the Arduino does not reset again mid-session
    if let Err(e) = port.write_data_terminal_ready(true) {
        tracing::debug!("configure_port: failed to set DTR high: {} (continuing)", e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let mut names = vec![
            "/dev/ttyUSB1",
            "COM10",
            "/dev/ttyACM1",
            "/dev/ttyUSB0",
            "COM2",
            "/dev/ttyACM0",
            "/dev/someport",
            "/dev/ttyACM10",
        ];
        names.sort_by_key(|n| port_sort_key(n));

        assert_eq!(
            names,
            vec![
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "COM2",
                "COM10",
                "/dev/someport",
            ]
        );
    }

    struct NullTransport {
        name: String,
        closed: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for NullTransport {
        fn port_name(&self) -> &str {
            &self.name
        }
        fn send(&mut self, _bytes: &[u8]) -> Result<(), ProtocolError> {
            Ok(())
        }
        fn receive(&mut self, _max_bytes: usize) -> Result<Vec<u8>, ProtocolError> {
            Ok(Vec::new())
        }
        fn close(&mut self) {
            self.closed.lock().unwrap().push(self.name.clone());
        }
    }

    struct FakePorts {
        names: Vec<&'static str>,
        unopenable: Vec<&'static str>,
        closed: Arc<Mutex<Vec<String>>>,
    }

    impl PortOpener for FakePorts {
        fn candidates(&self) -> Vec<String> {
            self.names.iter().map(|n| n.to_string()).collect()
        }
        fn open(&self, name: &str) -> Result<Box<dyn Transport>, ProtocolError> {
            if self.unopenable.iter().any(|n| *n == name) {
                return Err(ProtocolError::PortUnavailable {
                    port: name.to_string(),
                    reason: "Access denied".to_string(),
                });
            }
            Ok(Box::new(NullTransport {
                name: name.to_string(),
                closed: self.closed.clone(),
            }))
        }
    }

    #[test]
    fn test_discover_picks_first_answering_port() {
        let closed = Arc::new(Mutex::new(Vec::new()));
        let ports = FakePorts {
            names: vec!["COM1", "COM2", "COM3", "COM4"],
            unopenable: vec!["COM2"],
            closed: closed.clone(),
        };

        let found = discover(&ports, |t| {
            if t.port_name() == "COM3" || t.port_name() == "COM4" {
                Ok(())
            } else {
                Err(ProtocolError::Timeout { exchange: "WAKE" })
            }
        })
        .unwrap();

        assert_eq!(found.port_name(), "COM3");
        assert_eq!(*closed.lock().unwrap(), vec!["COM1".to_string()]);
    }

    #[test]
    fn test_discover_not_found() {
        let ports = FakePorts {
            names: vec!["COM1", "COM2"],
            unopenable: vec![],
            closed: Arc::new(Mutex::new(Vec::new())),
        };
        let err = discover(&ports, |_| Err(ProtocolError::Timeout { exchange: "WAKE" }))
            .err()
            .unwrap();
        assert!(matches!(err, ProtocolError::NotFound { tried: 2 }));
    }
}
