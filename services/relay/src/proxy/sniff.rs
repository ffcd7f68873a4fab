//! Tunnel protocol detection from the first two bytes of a stream.
//!
//! A tunnel client opens every connection with a frame header, so the first
//! byte is a protocol version and the second a command code:
//! - version must be 1 or 2 (or one specific version when restricted)
//! - command must be SYN, FIN, PSH, NOP or UPD
//!
//! Anything else is plain traffic for the direct target. Exactly two bytes
//! are read from the raw stream and nothing is buffered past them, so the
//! relay continues reading from the same socket afterwards.

use std::time::Duration;

use kcpraw_frame::{is_supported_version, Command};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::debug;

use crate::error::SniffError;

/// Number of bytes inspected to classify a connection.
pub const SNIFF_LEN: usize = 2;

/// Default sniff timeout (none: wait as long as the connection lives).
pub const DEFAULT_SNIFF_TIMEOUT: Option<Duration> = None;

/// Classification of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Stream starts with a tunnel frame header.
    Tunnel,
    /// Any other traffic.
    Plain,
}

impl Protocol {
    pub fn is_tunnel(self) -> bool {
        self == Protocol::Tunnel
    }
}

/// Outcome of a successful sniff.
///
/// `header[..bytes_read]` are the bytes consumed from the client and must be
/// replayed to whichever backend is dialed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniffResult {
    pub protocol: Protocol,
    pub header: [u8; SNIFF_LEN],
    pub bytes_read: usize,
}

impl SniffResult {
    /// Result used when sniffing is disabled: nothing read, always plain.
    pub fn skipped() -> Self {
        Self {
            protocol: Protocol::Plain,
            header: [0; SNIFF_LEN],
            bytes_read: 0,
        }
    }

    /// Bytes consumed from the client.
    pub fn consumed(&self) -> &[u8] {
        &self.header[..self.bytes_read]
    }
}

/// Configuration for protocol sniffing.
#[derive(Debug, Clone, Default)]
pub struct SniffConfig {
    /// Only treat this protocol version as tunnel traffic.
    pub required_version: Option<u8>,
    /// Maximum time to wait for the preamble.
    pub timeout: Option<Duration>,
}

/// Classify a 2-byte preamble.
pub fn classify(header: [u8; SNIFF_LEN], required_version: Option<u8>) -> Protocol {
    let [version, cmd] = header;

    if !is_supported_version(version) {
        return Protocol::Plain;
    }

    if required_version.is_some_and(|required| required != version) {
        return Protocol::Plain;
    }

    if Command::try_from(cmd).is_err() {
        return Protocol::Plain;
    }

    Protocol::Tunnel
}

/// Reads and classifies connection preambles.
#[derive(Debug, Clone, Default)]
pub struct ProtocolSniffer {
    config: SniffConfig,
}

impl ProtocolSniffer {
    /// Create a sniffer with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sniffer with custom configuration.
    pub fn with_config(config: SniffConfig) -> Self {
        Self { config }
    }

    /// Read exactly two bytes from `stream` and classify them.
    ///
    /// A short read or I/O error is a failure, never a `Plain` result.
    pub async fn sniff<R: AsyncRead + Unpin>(
        &self,
        stream: &mut R,
    ) -> Result<SniffResult, SniffError> {
        let mut header = [0u8; SNIFF_LEN];

        let read_result = match self.config.timeout {
            Some(limit) => timeout(limit, read_preamble(stream, &mut header))
                .await
                .map_err(|_| SniffError::Timeout)?,
            None => read_preamble(stream, &mut header).await,
        };

        let bytes_read = read_result.map_err(SniffError::Io)?;
        if bytes_read < SNIFF_LEN {
            return Err(SniffError::Closed {
                partial: header[..bytes_read].to_vec(),
            });
        }

        let protocol = classify(header, self.config.required_version);
        debug!(
            version = header[0],
            cmd = header[1],
            tunnel = protocol.is_tunnel(),
            "Preamble classified"
        );

        Ok(SniffResult {
            protocol,
            header,
            bytes_read,
        })
    }
}

/// Fill `buf` from `stream`, stopping early only on EOF.
///
/// Returns the number of bytes read.
async fn read_preamble<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut [u8; SNIFF_LEN],
) -> std::io::Result<usize> {
    let mut total_read = 0;
    while total_read < SNIFF_LEN {
        let n = stream.read(&mut buf[total_read..]).await?;
        if n == 0 {
            break;
        }
        total_read += n;
    }
    Ok(total_read)
}
