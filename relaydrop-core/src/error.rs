//! Error types shared by the relay and the send/receive clients.

use thiserror::Error;

/// Boxed source error carried by the transport-level variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything that can go wrong while pairing or relaying a transfer.
///
/// Handshake-level variants are local to the offending connection; the relay
/// logs them and keeps running. Only a failure to bind the listener is fatal
/// to the relay process, and that surfaces from the listener factory, not as
/// one of these.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Bad command-line arguments.
    #[error("usage error: {message}")]
    Usage { message: String },

    /// The relay host name could not be resolved.
    #[error("failed to resolve relay address {addr}")]
    Resolution {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The TCP connection to the relay could not be established.
    #[error("failed to connect to relay at {addr}")]
    Connect {
        addr: String,
        #[source]
        source: BoxError,
    },

    /// Malformed, truncated or timed-out handshake.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// A receiver presented a digest no sender has registered.
    #[error("no sender is waiting for this secret")]
    NoPeer,

    /// A pending sender was claimed after it had outlived the pending TTL.
    #[error("pending transfer for {digest} expired before a receiver arrived")]
    StaleEntry { digest: String },

    /// Local file failure or mid-stream socket failure.
    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: BoxError,
    },
}

impl RelayError {
    /// Shorthand for [`RelayError::Protocol`].
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Wraps a transport or file error with a short description of the step
    /// that failed.
    pub fn io(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Io {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Returns true for errors caused by the peer violating the handshake,
    /// as opposed to local or network failures.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    /// Renders the error and its whole source chain on one line.
    #[must_use]
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str(": ");
            out.push_str(&err.to_string());
            source = std::error::Error::source(err);
        }
        out
    }
}

/// Convenience result type for relaydrop operations.
pub type Result<T> = std::result::Result<T, RelayError>;
