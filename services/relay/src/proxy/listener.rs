//! TCP listener and per-connection sessions.
//!
//! Every accepted connection gets its own task running
//! sniff -> dispatch (dial + replay) -> relay. Session failures are logged
//! and contained; only binding the listen socket can fail the listener.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};

use super::dispatch::{Backend, Dispatcher};
use super::relay::{relay, RelayConfig, RelayOutcome};
use super::sniff::{Protocol, ProtocolSniffer, SniffConfig, SniffResult};
use crate::error::RelayError;

/// Default maximum concurrent connections per listener.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Pause after an accept error before accepting again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Sniff the preamble; when off every connection goes to the direct target.
    pub sniff_enabled: bool,
    /// Sniffer configuration.
    pub sniff: SniffConfig,
    /// Relay configuration.
    pub relay: RelayConfig,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            sniff_enabled: true,
            sniff: SniffConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Total connections currently active.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
    /// Connections rejected due to max limit.
    pub connections_rejected: AtomicU64,
    /// Connections classified as tunnel traffic.
    pub sniffed_tunnel: AtomicU64,
    /// Connections classified as plain traffic.
    pub sniffed_plain: AtomicU64,
    /// Sniff failures (short read, timeout, I/O error).
    pub sniff_failed: AtomicU64,
    /// Backend dial failures.
    pub dial_failed: AtomicU64,
    /// Preamble replay failures.
    pub replay_failed: AtomicU64,
    /// Bytes relayed to backends (excluding the replayed preamble).
    pub bytes_to_backend: AtomicU64,
    /// Bytes relayed from backends.
    pub bytes_from_backend: AtomicU64,
}

impl ListenerStats {
    fn record_error(&self, err: &RelayError) {
        let counter = match err {
            RelayError::Sniff(_) => &self.sniff_failed,
            RelayError::Dial { .. } => &self.dial_failed,
            RelayError::Replay(_) => &self.replay_failed,
            RelayError::Io(_) => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The raw TCP listener in front of the tunnel.
pub struct Listener {
    /// The TCP listener.
    listener: TcpListener,
    /// Listener configuration.
    config: ListenerConfig,
    /// Preamble sniffer.
    sniffer: ProtocolSniffer,
    /// Backend dispatcher.
    dispatcher: Dispatcher,
    /// Connection semaphore for limiting concurrent connections.
    conn_semaphore: Arc<Semaphore>,
    /// Statistics.
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind the listen socket.
    pub async fn bind(config: ListenerConfig, dispatcher: Dispatcher) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            max_connections = config.max_connections,
            sniff_enabled = config.sniff_enabled,
            tunnel_addr = %dispatcher.addr(Backend::Tunnel),
            direct_addr = %dispatcher.addr(Backend::Direct),
            "Listener bound"
        );

        Ok(Self {
            conn_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            sniffer: ProtocolSniffer::with_config(config.sniff.clone()),
            listener,
            config,
            dispatcher,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Run the accept loop. Only returns if the bound socket itself breaks.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let permit = match self.conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.stats
                                .connections_rejected
                                .fetch_add(1, Ordering::Relaxed);
                            warn!(peer_addr = %peer_addr, "Connection rejected: max connections reached");
                            continue;
                        }
                    };

                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .connections_active
                        .fetch_add(1, Ordering::Relaxed);

                    let listener = Arc::clone(&self);
                    let stats = Arc::clone(&self.stats);

                    tokio::spawn(
                        async move {
                            match listener.handle_connection(stream).await {
                                Ok(outcome) => {
                                    debug!(
                                        bytes_to_backend = outcome.bytes_to_backend,
                                        bytes_from_backend = outcome.bytes_from_backend,
                                        closed_by = ?outcome.closed_by,
                                        "Session closed"
                                    );
                                }
                                Err(e) => {
                                    stats.record_error(&e);
                                    match &e {
                                        RelayError::Dial { .. } | RelayError::Replay(_) => {
                                            warn!(reason = e.reason_code(), error = %e, "Session aborted");
                                        }
                                        _ => {
                                            debug!(reason = e.reason_code(), error = %e, "Session aborted");
                                        }
                                    }
                                }
                            }

                            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                            drop(permit);
                        }
                        .instrument(tracing::info_span!("session", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    // Brief sleep to avoid tight loop on persistent errors
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Run one session to completion.
    ///
    /// Both sockets are closed when this returns, on every path.
    async fn handle_connection(&self, mut client: TcpStream) -> Result<RelayOutcome, RelayError> {
        debug!("Handling connection");

        let sniffed = if self.config.sniff_enabled {
            self.sniffer.sniff(&mut client).await?
        } else {
            SniffResult::skipped()
        };

        if self.config.sniff_enabled {
            let counter = match sniffed.protocol {
                Protocol::Tunnel => &self.stats.sniffed_tunnel,
                Protocol::Plain => &self.stats.sniffed_plain,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }

        let (backend, selected) = self.dispatcher.connect(&sniffed).await?;
        debug!(
            backend = %selected,
            replayed = sniffed.bytes_read,
            "Connected to backend"
        );

        let outcome = relay(client, backend, &self.config.relay).await;

        self.stats
            .bytes_to_backend
            .fetch_add(outcome.bytes_to_backend, Ordering::Relaxed);
        self.stats
            .bytes_from_backend
            .fetch_add(outcome.bytes_from_backend, Ordering::Relaxed);

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_config_default() {
        let config = ListenerConfig::new("127.0.0.1:0".parse().unwrap());
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert!(config.sniff_enabled);
        assert!(config.sniff.required_version.is_none());
        assert!(config.relay.idle_timeout.is_none());
        assert!(!config.relay.half_close);
    }

    #[test]
    fn test_record_error() {
        let stats = ListenerStats::default();
        stats.record_error(&RelayError::Sniff(crate::error::SniffError::Timeout));
        stats.record_error(&RelayError::Dial {
            backend: Backend::Direct,
            addr: "127.0.0.1:1".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        });
        stats.record_error(&RelayError::Io(io::Error::from(io::ErrorKind::Other)));
        assert_eq!(stats.sniff_failed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.dial_failed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.replay_failed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_bind_in_use_fails() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ListenerConfig::new(taken.local_addr().unwrap());
        let result = Listener::bind(config, Dispatcher::new("127.0.0.1:1", "127.0.0.1:2")).await;
        assert!(result.is_err());
    }
}
