pub mod config;
pub mod error;
pub mod proxy;

pub use config::Config;
pub use error::{RelayError, SniffError};
pub use proxy::{
    classify, relay, Backend, CloseGuard, Direction, Dispatcher, Listener, ListenerConfig,
    ListenerStats, Protocol, ProtocolSniffer, RelayConfig, RelayOutcome, SniffConfig, SniffResult,
};
