//! Error types for the event-streaming server.

use std::fmt;
use thiserror::Error;

/// Severity attached to every report delivered through the error callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSeverity {
    /// The server has stopped (or is stopping). Treat the channel as dead.
    Critical,
    /// A single frame was dropped. The server keeps running.
    Warning,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "critical"),
            ErrorSeverity::Warning => write!(f, "warning"),
        }
    }
}

/// A notification payload could not be turned into an [`Event`](crate::events::Event).
#[derive(Debug, Error)]
pub enum DeserializationError {
    /// Payload was empty.
    #[error("empty event payload")]
    Empty,

    /// Payload was not a known event encoding.
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors produced by the server, its sockets, and the producer-side client.
#[derive(Debug, Error)]
pub enum StreamError {
    /// An endpoint could not be created or bound.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: zmq::Error,
    },

    /// ZMQ error on an already bound endpoint.
    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),

    /// A frame field was not valid UTF-8.
    #[error("frame field {index} is not valid UTF-8: {source}")]
    Decode {
        index: usize,
        #[source]
        source: std::str::Utf8Error,
    },

    /// A frame did not have the expected shape.
    #[error("invalid frame: {0}")]
    Frame(String),

    /// Event payload could not be deserialized.
    #[error(transparent)]
    Deserialization(#[from] DeserializationError),

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The server thread could not be started.
    #[error("spawn failed: {0}")]
    Spawn(String),

    /// Handshake was not acknowledged as expected.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, StreamError>;
