//! Error types for frame decoding.

use thiserror::Error;

/// Errors that can occur when interpreting frame bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes were supplied than the fixed-size record needs.
    #[error("short buffer: need {needed} bytes, got {actual}")]
    ShortBuffer { needed: usize, actual: usize },

    /// The command byte is not one of SYN, FIN, PSH, NOP, UPD.
    #[error("unknown command: {0}")]
    UnknownCommand(u8),

    /// The payload does not fit in the 16-bit length field.
    #[error("payload too large: {0} bytes (max 65535)")]
    PayloadTooLarge(usize),
}

impl FrameError {
    /// Returns true if this error came from an undersized input buffer.
    pub fn is_short_buffer(&self) -> bool {
        matches!(self, FrameError::ShortBuffer { .. })
    }
}
