//! Transport error taxonomy shared by the transport crate and its callers.

use std::time::Duration;

use crate::pixels::GridError;
use crate::wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Caller supplied something the protocol can never carry.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// Dial or write deadline elapsed.
    #[error("{addr} timed out after {elapsed:?}")]
    Timeout { addr: String, elapsed: Duration },

    #[error("connection to {addr} failed: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),

    #[error("packet (row {row}, offset {offset}) not acknowledged after {attempts} attempts")]
    Delivery { row: u64, offset: u64, attempts: u32 },

    #[error("packet (row {row}, offset {offset}) rejected by receiver")]
    Rejected { row: u64, offset: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Map a wire-level bound violation on an outbound value to a
    /// validation failure; everything else stays a protocol error.
    pub fn outbound(err: WireError) -> Self {
        match err {
            WireError::FieldTooLong { field, len, max } => TransportError::Validation {
                field,
                reason: format!("{len} bytes exceeds maximum of {max}"),
            },
            WireError::TextTooLarge(len) => TransportError::Validation {
                field: "text",
                reason: format!("{len} bytes exceeds maximum of {}", crate::wire::MAX_TEXT_LEN),
            },
            other => TransportError::Protocol(other),
        }
    }
}

impl From<GridError> for TransportError {
    fn from(err: GridError) -> Self {
        TransportError::Validation {
            field: "image",
            reason: err.to_string(),
        }
    }
}
