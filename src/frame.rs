//! Framing errors shared by the codec and the connection layer.
//!
//! `Frame` and `PduRegistry` live in `codec`; they are re-exported here so
//! transport code can depend on a single module.

pub use crate::codec::{CodecError, Frame, PduRegistry};

/// Outcome of trying to cut one PDU out of a read buffer.
#[derive(Debug)]
pub enum Error {
    /// Not enough data is available to parse a message
    Incomplete,
    /// A complete PDU was present but its contents are invalid. The stream
    /// is still in sync, so the peer can be nacked and reading continues.
    Invalid(CodecError),
    /// The stream cannot be resynchronised (for example a bogus length)
    Other(crate::Error),
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Incomplete => Error::Incomplete,
            other => Error::Invalid(other),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Incomplete => write!(f, "Incomplete frame"),
            Error::Invalid(err) => write!(f, "Invalid frame: {err}"),
            Error::Other(err) => write!(f, "Frame error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Invalid(err) => Some(err),
            Error::Other(err) => Some(err.as_ref()),
            Error::Incomplete => None,
        }
    }
}
