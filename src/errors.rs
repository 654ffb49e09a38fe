/// All error types that can occur when discovering or controlling lights.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A color expression was not a known name, a `#RRGGBB` string, or a
    /// partial HSBK object.
    #[error("invalid color format: {0}")]
    InvalidColorFormat(String),

    /// The serial has never been seen by the registry.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// A remote command against a single device failed.
    #[error("remote command failed for {serial}: {reason}")]
    Remote { serial: String, reason: String },

    /// A remote call did not complete within its deadline.
    #[error("{action} timed out for {serial}")]
    Timeout { serial: String, action: String },

    /// The transport endpoint itself failed (bind, broadcast, shutdown).
    #[error("transport error: {0}")]
    Transport(String),

    /// A device answered a request with the wrong message type.
    #[error("unexpected response from {serial}; expected {expected}")]
    UnexpectedResponse {
        serial: String,
        expected: &'static str,
    },

    /// The request named an operation this library does not provide.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// The request was structurally invalid (missing or mistyped field).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Create a new remote command failure for a device.
    pub fn remote(serial: &str, reason: impl std::fmt::Display) -> Self {
        Error::Remote {
            serial: serial.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a new per-call timeout error.
    pub fn timeout(serial: &str, action: &str) -> Self {
        Error::Timeout {
            serial: serial.to_string(),
            action: action.to_string(),
        }
    }

    /// Create a new unexpected response error.
    pub fn unexpected(serial: &str, expected: &'static str) -> Self {
        Error::UnexpectedResponse {
            serial: serial.to_string(),
            expected,
        }
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
