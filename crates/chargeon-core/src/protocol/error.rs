//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the ChargeOn module
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A candidate port could not be opened or configured
    #[error("Port {port} unavailable: {reason}")]
    PortUnavailable {
        /// Port identifier
        port: String,
        /// Why opening failed
        reason: String,
    },

    /// A port opened but did not answer the presence check
    #[error("No answer to WAKE on {port}: {reason}")]
    HandshakeFailed {
        /// Port identifier
        port: String,
        /// Error from the presence exchange
        reason: String,
    },

    /// Discovery ran out of candidates
    #[error("Could not find an available ChargeOn module ({tried} ports tried)")]
    NotFound {
        /// Number of candidates probed
        tried: usize,
    },

    /// No transport is attached
    #[error("Not connected to a ChargeOn module")]
    NotConnected,

    /// Another exchange held the slot after the backoff
    #[error("Serial port seems to be busy")]
    Busy,

    /// Nothing came back after the settle time
    #[error("No response to {exchange} signal")]
    Timeout {
        /// Exchange label
        exchange: &'static str,
    },

    /// The reply did not start with the expected marker
    #[error("Unexpected response {actual:?} to {exchange} signal (expected {expected:?})")]
    UnexpectedResponse {
        /// Exchange label
        exchange: &'static str,
        /// Marker the reply should start with
        expected: &'static str,
        /// What was read
        actual: String,
    },

    /// LEARN finished without a usable code
    #[error("Unable to capture the outlet code")]
    CaptureFailed,

    /// A settings push was requested without a profile
    #[error("{0} signal requires outlet settings")]
    MissingPayload(&'static str),

    /// Serial I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the link should be presumed dead and re-discovered
    pub fn is_link_fault(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::Timeout { .. }
                | ProtocolError::UnexpectedResponse { .. }
                | ProtocolError::NotConnected
        )
    }
}
