//! Serial Protocol Communication
//!
//! Implements the ASCII marker protocol spoken by the ChargeOn module.
//!
//! Every exchange is a bracketed request marker (plus a settings payload for
//! pushes), a settle sleep sized to the request and link speed, and a read of
//! the expected response marker. Only one exchange may be in flight.

pub mod codec;
mod engine;
mod error;
pub mod exchange;
pub mod serial;

pub use engine::{ExchangeTiming, ProtocolEngine};
pub use error::ProtocolError;
pub use exchange::ExchangeKind;
pub use serial::{list_ports, PortInfo, PortOpener, SerialTransport, SystemPorts, Transport};

/// Baud rate of the module's serial link
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Reference baud rate for settle times: one millisecond per request byte
pub const REFERENCE_BAUD_RATE: u32 = 115200;

/// Highest port number probed during discovery (exclusive)
pub const MAX_PORT_NUM: u32 = 256;

/// Response buffer for exchanges that carry a payload back
pub const MAX_RESPONSE_SIZE: usize = 85;
