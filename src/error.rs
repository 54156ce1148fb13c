//! The error taxonomy shared by every stage of the acquisition pipeline.
//!
//! Each variant is distinct so that a caller (usually whatever owns a
//! [`Session`](crate::session::Session)) can pick its own policy: surface the
//! problem, reconnect, or abort.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between building a command frame and
/// feeding decoded samples into a window.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration field is outside its declared domain. Raised before
    /// any bytes reach the wire.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The peer closed the stream (a zero-length receive). Terminal for the
    /// connection, never retried internally.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Declared and observed byte counts disagree. Nothing is decoded.
    #[error("frame size mismatch: expected {expected} bytes, got {actual}")]
    FrameSizeMismatch {
        /// Byte count implied by the profile or layout
        expected: usize,
        /// Byte count actually handed to the decoder
        actual: usize,
    },

    /// Only 2- and 3-byte samples exist on the wire.
    #[error("unsupported sample width: {0} bytes (expected 2 or 3)")]
    UnsupportedSampleWidth(usize),

    /// The device answered a handshake request with a non-zero error code.
    #[error("device rejected request with error code {0}")]
    HandshakeRejected(u8),

    /// A handshake response did not have the expected shape.
    #[error("malformed device response: {0}")]
    MalformedResponse(String),

    /// A configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// The background acquisition thread panicked.
    #[error("acquisition thread panicked")]
    SessionPanicked,

    /// Any other transport failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for building an [`Error::InvalidConfiguration`].
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// True for errors that end the connection rather than a single block.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed | Error::Io(_) | Error::SessionPanicked
        )
    }
}

impl From<ron::de::SpannedError> for Error {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::Config(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_errors() {
        assert!(Error::ConnectionClosed.is_terminal());
        assert!(Error::Io(std::io::Error::other("boom")).is_terminal());
        assert!(!Error::FrameSizeMismatch {
            expected: 16,
            actual: 15
        }
        .is_terminal());
        assert!(!Error::UnsupportedSampleWidth(4).is_terminal());
    }

    #[test]
    fn messages_name_the_numbers() {
        let msg = Error::FrameSizeMismatch {
            expected: 16,
            actual: 12,
        }
        .to_string();
        assert!(msg.contains("16"));
        assert!(msg.contains("12"));
        assert_eq!(
            Error::HandshakeRejected(255).to_string(),
            "device rejected request with error code 255"
        );
    }
}
