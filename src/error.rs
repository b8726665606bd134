// ABOUTME: Error taxonomy for simulator operations: transport, protocol, size-limit, codec and configuration
// ABOUTME: Classifies failures so managers know whether to reconnect or report to the caller

use crate::codec::CodecError;
use crate::datatypes::CommandStatus;
use std::io;
use thiserror::Error;

/// Error type shared by sessions, managers and the concatenation engine
#[derive(Debug, Error)]
pub enum SmppError {
    /// I/O error during network operations (connection, read, write)
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// SMPP protocol error indicated by command_status field
    #[error("Protocol error: {0:?}")]
    Protocol(CommandStatus),

    /// A PDU could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The byte stream can no longer be split into PDUs
    #[error("Framing error: {0}")]
    Framing(String),

    /// Data validation error (malformed addresses, bad field lengths, ...)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,

    /// Unexpected PDU received (wrong response type for request)
    #[error("Unexpected PDU: expected {expected}, got {actual}")]
    UnexpectedPdu { expected: String, actual: String },

    /// Connection closed unexpectedly
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// Session or manager not in correct state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Splitting would need more parts than a part counter can express
    #[error("Message needs {parts} parts, maximum is {max}")]
    SizeLimit { parts: usize, max: usize },

    /// Body too large for a single message_payload parameter
    #[error("Payload of {size} octets exceeds the {max} octet limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// Invalid connection configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for SMPP operations
pub type SmppResult<T> = Result<T, SmppError>;

impl SmppError {
    /// Transport failures go down the reconnection path instead of being
    /// reported to a sender as a protocol outcome.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SmppError::Connection(_)
                | SmppError::Timeout
                | SmppError::ConnectionClosed
                | SmppError::Framing(_)
        )
    }

    /// Protocol errors that also mean the session is no longer usable.
    pub fn invalidates_session(&self) -> bool {
        match self {
            SmppError::Protocol(status) => status.invalidates_session(),
            other => other.is_transport(),
        }
    }

    pub fn command_status(&self) -> Option<CommandStatus> {
        match self {
            SmppError::Protocol(status) => Some(*status),
            SmppError::Codec(err) => Some(err.to_command_status()),
            _ => None,
        }
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for SmppError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            SmppError::Connection(io::Error::new(io_err.kind(), err.to_string()))
        } else {
            SmppError::InvalidData(err.to_string())
        }
    }
}

impl From<crate::frame::Error> for SmppError {
    fn from(err: crate::frame::Error) -> Self {
        match err {
            crate::frame::Error::Incomplete => SmppError::Framing("incomplete frame".into()),
            crate::frame::Error::Invalid(codec) => SmppError::Codec(codec),
            crate::frame::Error::Other(other) => SmppError::Framing(other.to_string()),
        }
    }
}
