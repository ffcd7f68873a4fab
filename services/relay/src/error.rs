//! Error types for relay sessions.

use std::io;

use thiserror::Error;

use crate::proxy::Backend;

/// Failure while reading the 2-byte preamble from a client.
#[derive(Debug, Error)]
pub enum SniffError {
    /// The client closed before both preamble bytes arrived.
    #[error("connection closed after {} of 2 preamble bytes", .partial.len())]
    Closed { partial: Vec<u8> },

    /// The preamble did not arrive within the sniff timeout.
    #[error("sniff timeout")]
    Timeout,

    /// Read error on the client connection.
    #[error("sniff read failed: {0}")]
    Io(#[source] io::Error),
}

impl SniffError {
    /// Bytes read before the failure, for diagnostics only.
    pub fn partial(&self) -> &[u8] {
        match self {
            SniffError::Closed { partial } => partial,
            _ => &[],
        }
    }
}

/// Errors that abort a relay session before or during relaying.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Protocol sniffing failed; no backend was dialed.
    #[error(transparent)]
    Sniff(#[from] SniffError),

    /// The selected backend could not be reached.
    #[error("dial {backend} backend {addr} failed: {source}")]
    Dial {
        backend: Backend,
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Writing the sniffed bytes to the backend failed.
    #[error("replay to backend failed: {0}")]
    Replay(#[source] io::Error),

    /// Other I/O error on an established session.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl RelayError {
    /// Standardized reason code for logs and counters.
    pub fn reason_code(&self) -> &'static str {
        match self {
            RelayError::Sniff(SniffError::Closed { .. }) => "sniff_closed",
            RelayError::Sniff(SniffError::Timeout) => "sniff_timeout",
            RelayError::Sniff(SniffError::Io(_)) => "sniff_io_error",
            RelayError::Dial { .. } => "dial_failed",
            RelayError::Replay(_) => "replay_failed",
            RelayError::Io(_) => "io_error",
        }
    }
}
