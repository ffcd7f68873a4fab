//! Backend selection, dialing and preamble replay.
//!
//! Each session dials exactly one backend:
//! - the tunnel endpoint when the preamble is a tunnel frame header
//! - the direct target otherwise
//!
//! The sniffed bytes are written to the backend before anything else, so the
//! backend sees the same byte stream the client sent. No retries.

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::sniff::SniffResult;
use crate::error::RelayError;

/// Default connect timeout for backend dials (none: the OS decides).
pub const DEFAULT_CONNECT_TIMEOUT: Option<Duration> = None;

/// Which backend a session is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// The tunnel server endpoint.
    Tunnel,
    /// The direct target for plain traffic.
    Direct,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Tunnel => "tunnel",
            Backend::Direct => "direct",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chooses and dials the backend for a sniffed connection.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    /// Tunnel endpoint address (`host:port`).
    tunnel_addr: String,
    /// Direct target address (`host:port`).
    direct_addr: String,
    /// Connect timeout for backend dials.
    connect_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher for the two backend addresses.
    pub fn new(tunnel_addr: impl Into<String>, direct_addr: impl Into<String>) -> Self {
        Self {
            tunnel_addr: tunnel_addr.into(),
            direct_addr: direct_addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set a connect timeout for backend dials.
    pub fn with_connect_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Address dialed for `backend`.
    pub fn addr(&self, backend: Backend) -> &str {
        match backend {
            Backend::Tunnel => &self.tunnel_addr,
            Backend::Direct => &self.direct_addr,
        }
    }

    /// Pick the backend for a sniff result.
    pub fn select(&self, sniffed: &SniffResult) -> Backend {
        if sniffed.protocol.is_tunnel() {
            Backend::Tunnel
        } else {
            Backend::Direct
        }
    }

    /// Open a TCP connection to `backend`.
    pub async fn dial(&self, backend: Backend) -> Result<TcpStream, RelayError> {
        let addr = self.addr(backend);
        debug!(backend = %backend, backend_addr = %addr, "Dialing backend");

        let result = match self.connect_timeout {
            Some(limit) => match timeout(limit, TcpStream::connect(addr)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout")),
            },
            None => TcpStream::connect(addr).await,
        };

        result.map_err(|source| RelayError::Dial {
            backend,
            addr: addr.to_string(),
            source,
        })
    }

    /// Select, dial and replay in one step.
    ///
    /// On success the returned stream has already received the sniffed bytes.
    pub async fn connect(&self, sniffed: &SniffResult) -> Result<(TcpStream, Backend), RelayError> {
        let backend = self.select(sniffed);
        let mut stream = self.dial(backend).await?;
        replay(&mut stream, sniffed).await?;
        Ok((stream, backend))
    }
}

/// Write the bytes consumed by sniffing to `backend`, in order.
pub async fn replay<W: AsyncWrite + Unpin>(
    backend: &mut W,
    sniffed: &SniffResult,
) -> Result<(), RelayError> {
    let consumed = sniffed.consumed();
    if consumed.is_empty() {
        return Ok(());
    }

    backend.write_all(consumed).await.map_err(RelayError::Replay)?;
    backend.flush().await.map_err(RelayError::Replay)?;
    debug!(bytes = consumed.len(), "Preamble replayed");
    Ok(())
}
