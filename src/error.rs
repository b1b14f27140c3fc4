//! Error model for the `serverquery` crate.

use std::time::Duration;

use thiserror::Error;

/// Convenience result type.
pub type Result<T> = std::result::Result<T, Error>;

/// High-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An I/O level failure (socket, EOF, etc.).
    Io,
    /// Connection setup or login failed.
    Connect,
    /// The server did not speak ServerQuery (banner mismatch).
    Protocol,
    /// Writing to or reading from the link failed at steady state.
    Transport,
    /// A line could not be decoded into the expected shape.
    Decode,
    /// The server answered a command with a non-zero error id.
    Query,
    /// The connection was closed.
    Disconnected,
    /// The call timed out.
    Timeout,
    /// The call was cancelled.
    Cancelled,
    /// The notification receiver fell behind and dropped events.
    EventLagged,
}

/// Structured error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Socket / file I/O error.
    #[error("I/O error: {source}")]
    Io {
        /// Lower-level error.
        #[from]
        source: std::io::Error,
    },

    /// Connecting, logging in or selecting a virtual server failed.
    #[error("ServerQuery connect failed: {message}")]
    Connect {
        /// Human readable message.
        message: String,
    },

    /// The peer sent an unexpected banner.
    #[error("ServerQuery protocol error: {message}")]
    Protocol {
        /// Human readable message.
        message: String,
    },

    /// The link failed after setup.
    #[error("ServerQuery transport error: {message}")]
    Transport {
        /// Human readable message.
        message: String,
    },

    /// Malformed line content.
    #[error("ServerQuery decode error: {message}")]
    Decode {
        /// Human readable message.
        message: String,
    },

    /// A command completed with a non-zero error id.
    ///
    /// Only produced by [`crate::Response::check`]; [`crate::Client::command`]
    /// returns non-zero ids as ordinary data.
    #[error("ServerQuery command failed: error id={id}: {msg}")]
    Query {
        /// Server error id.
        id: i64,
        /// Server error message.
        msg: String,
    },

    /// The connection closed while a request was in-flight.
    #[error("ServerQuery connection closed")]
    Disconnected,

    /// A command call exceeded the configured timeout.
    #[error("ServerQuery command timed out after {timeout:?}")]
    Timeout {
        /// Timeout value.
        timeout: Duration,
    },

    /// A command call was cancelled.
    #[error("ServerQuery command cancelled")]
    Cancelled,

    /// The notification receiver lagged behind and dropped events.
    #[error("notification stream lagged behind and dropped {missed} events")]
    EventLagged {
        /// How many events were dropped.
        missed: usize,
    },
}

impl Error {
    /// Returns a coarse error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Connect { .. } => ErrorKind::Connect,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Query { .. } => ErrorKind::Query,
            Self::Disconnected => ErrorKind::Disconnected,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::EventLagged { .. } => ErrorKind::EventLagged,
        }
    }

    /// Whether the engine behind this error is gone for good.
    ///
    /// There is no reconnect: once this returns `true` the [`crate::Client`]
    /// must be dropped and a new one connected.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Io | ErrorKind::Transport | ErrorKind::Disconnected
        )
    }

    pub(crate) fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}
