//! Bidirectional byte relay between a client and its backend.
//!
//! Each direction is an independent copy loop with its own buffer. The
//! client-to-backend loop runs on a spawned task and the backend-to-client
//! loop on the session task, so a stalled peer in one direction never blocks
//! the other.
//!
//! Termination: by default the first direction to finish (clean EOF or error)
//! closes the session through a shared [`CloseGuard`], which stops the other
//! loop even if it is parked in a read or a write. With `half_close` enabled a
//! clean EOF only shuts down the opposite write side and the other direction
//! keeps draining; errors still close the whole session.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;

/// Default copy buffer size per direction.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default idle timeout (none for raw TCP).
pub const DEFAULT_IDLE_TIMEOUT: Option<Duration> = None;

/// Relay tuning.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Read buffer size for each direction.
    pub buffer_size: usize,
    /// End a direction whose read stays idle this long.
    pub idle_timeout: Option<Duration>,
    /// Propagate clean EOF as a write shutdown instead of closing the session.
    pub half_close: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            half_close: false,
        }
    }
}

/// One direction of a relayed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client_to_backend"),
            Direction::BackendToClient => f.write_str("backend_to_client"),
        }
    }
}

/// Once-only close flag shared by both directions of a session.
///
/// `close` flips the flag and wakes every waiter; only the first call
/// returns `true`. Waiting after the flag is set resolves immediately.
#[derive(Debug)]
pub struct CloseGuard {
    tx: watch::Sender<bool>,
}

impl CloseGuard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Close the session. Returns `true` if this call did the closing.
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the session is closed.
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Closes the guard when dropped, so a cancelled session never leaks the
/// spawned direction.
struct CloseOnDrop(Arc<CloseGuard>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Bytes copied from the client to the backend.
    pub bytes_to_backend: u64,
    /// Bytes copied from the backend to the client.
    pub bytes_from_backend: u64,
    /// Direction whose termination closed the session, if any.
    ///
    /// `None` means both directions drained to EOF in half-close mode.
    pub closed_by: Option<Direction>,
}

/// How a copy loop ended.
#[derive(Debug)]
enum CopyEnd {
    /// Source reached EOF.
    Eof,
    /// Read or write failed.
    Error(io::Error),
    /// The other direction closed the session.
    Cancelled,
}

#[derive(Debug)]
struct DirectionReport {
    bytes: u64,
    closed_session: bool,
}

/// Relay bytes between `client` and `backend` until the session ends.
///
/// Both streams are dropped, and therefore closed, by the time this returns.
pub async fn relay<A, B>(client: A, backend: B, config: &RelayConfig) -> RelayOutcome
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (backend_read, backend_write) = tokio::io::split(backend);

    let guard = Arc::new(CloseGuard::new());
    let _close_on_drop = CloseOnDrop(Arc::clone(&guard));

    let upstream = tokio::spawn(copy_direction(
        Direction::ClientToBackend,
        client_read,
        backend_write,
        Arc::clone(&guard),
        config.clone(),
    ));

    let downstream = copy_direction(
        Direction::BackendToClient,
        backend_read,
        client_write,
        Arc::clone(&guard),
        config.clone(),
    )
    .await;

    let upstream = match upstream.await {
        Ok(report) => report,
        Err(e) => {
            debug!(error = %e, "Relay task failed");
            DirectionReport {
                bytes: 0,
                closed_session: guard.close(),
            }
        }
    };

    guard.close();

    let closed_by = if upstream.closed_session {
        Some(Direction::ClientToBackend)
    } else if downstream.closed_session {
        Some(Direction::BackendToClient)
    } else {
        None
    };

    RelayOutcome {
        bytes_to_backend: upstream.bytes,
        bytes_from_backend: downstream.bytes,
        closed_by,
    }
}

async fn copy_direction<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    guard: Arc<CloseGuard>,
    config: RelayConfig,
) -> DirectionReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; config.buffer_size.max(1)];
    let mut total = 0u64;

    let end = tokio::select! {
        end = pump(&mut reader, &mut writer, &mut buf, &mut total, config.idle_timeout) => end,
        _ = guard.closed() => CopyEnd::Cancelled,
    };

    let closed_session = match end {
        CopyEnd::Eof if config.half_close => match writer.shutdown().await {
            Ok(()) => {
                debug!(direction = %direction, bytes = total, "Half-closed");
                false
            }
            Err(e) => {
                debug!(direction = %direction, error = %e, "Shutdown failed");
                guard.close()
            }
        },
        CopyEnd::Eof => {
            let _ = writer.shutdown().await;
            debug!(direction = %direction, bytes = total, "EOF");
            guard.close()
        }
        CopyEnd::Error(e) => {
            debug!(direction = %direction, bytes = total, error = %e, "Copy error");
            guard.close()
        }
        CopyEnd::Cancelled => false,
    };

    DirectionReport {
        bytes: total,
        closed_session,
    }
}

/// Copy until EOF or error, counting forwarded bytes into `total`.
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    total: &mut u64,
    idle_timeout: Option<Duration>,
) -> CopyEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let read_result = match idle_timeout {
            Some(limit) => match timeout(limit, reader.read(buf)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout")),
            },
            None => reader.read(buf).await,
        };

        let n = match read_result {
            Ok(0) => return CopyEnd::Eof,
            Ok(n) => n,
            Err(e) => return CopyEnd::Error(e),
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            return CopyEnd::Error(e);
        }
        if let Err(e) = writer.flush().await {
            return CopyEnd::Error(e);
        }
        *total += n as u64;
    }
}
