//! Protocol-sniffing TCP relay.
//!
//! This module provides:
//! - TCP listener management
//! - Tunnel preamble sniffing
//! - Backend selection, dialing and preamble replay
//! - Bidirectional relaying
//!
//! ## Architecture
//!
//! ```text
//!                                          +-> Tunnel endpoint
//! Client -> Listener -> Sniffer -> Dispatcher
//!                                          +-> Direct target
//!              (replay 2 sniffed bytes, then relay both ways)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use proxy::{Dispatcher, Listener, ListenerConfig};
//!
//! let dispatcher = Dispatcher::new("127.0.0.1:29901", "127.0.0.1:22");
//! let config = ListenerConfig::new("0.0.0.0:29900".parse()?);
//! let listener = Arc::new(Listener::bind(config, dispatcher).await?);
//! listener.run().await?;
//! ```

mod dispatch;
mod listener;
mod relay;
mod sniff;

pub use dispatch::{replay, Backend, Dispatcher, DEFAULT_CONNECT_TIMEOUT};
pub use listener::{Listener, ListenerConfig, ListenerStats, DEFAULT_MAX_CONNECTIONS};
pub use relay::{
    relay, CloseGuard, Direction, RelayConfig, RelayOutcome, DEFAULT_BUFFER_SIZE,
    DEFAULT_IDLE_TIMEOUT,
};
pub use sniff::{
    classify, Protocol, ProtocolSniffer, SniffConfig, SniffResult, DEFAULT_SNIFF_TIMEOUT,
    SNIFF_LEN,
};
