//! IPC error types

use thiserror::Error;

/// A single inbound line that does not follow the protocol.
///
/// Protocol errors are always recoverable: the offending line is dropped and
/// the reader keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Line is not valid UTF-8
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    /// Line is not valid JSON
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Root element is not an array
    #[error("root element is not a JSON array")]
    NotAnArray,

    /// Array is empty or its first element is not a string
    #[error("message has no keyword")]
    MissingKeyword,

    /// Keyword is not part of the protocol
    #[error("unknown keyword \"{0}\"")]
    UnknownKeyword(String),

    /// Known keyword with the wrong number of elements
    #[error("\"{keyword}\" expects {expected} elements, got {actual}")]
    InvalidArity {
        keyword: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Known keyword with an argument of the wrong type
    #[error("\"{keyword}\" has an invalid argument: {reason}")]
    InvalidArgument {
        keyword: &'static str,
        reason: &'static str,
    },
}

/// Stream-level IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Malformed message
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl IpcError {
    /// Whether the error ends the reader or writer task that observed it.
    ///
    /// Protocol errors only cost the offending line; everything else means
    /// the stream is unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, IpcError::Protocol(_))
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::UnexpectedEof => IpcError::ConnectionClosed,
            _ => IpcError::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            IpcError::IoError(err.to_string())
        } else {
            IpcError::SerializationError(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_fatal() {
        assert!(IpcError::IoError("disk on fire".to_string()).is_fatal());
        assert!(IpcError::ConnectionClosed.is_fatal());
        assert!(!IpcError::Protocol(ProtocolError::NotAnArray).is_fatal());
        assert!(!IpcError::from(ProtocolError::MissingKeyword).is_fatal());
    }

    #[test]
    fn test_broken_pipe_maps_to_connection_closed() {
        let err = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(matches!(IpcError::from(err), IpcError::ConnectionClosed));
    }
}
