//! Relay configuration.
//!
//! Loaded once from the environment at startup and treated as immutable.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::proxy::{
    Dispatcher, ListenerConfig, RelayConfig, SniffConfig, DEFAULT_BUFFER_SIZE,
    DEFAULT_MAX_CONNECTIONS,
};

/// Default raw TCP listen address.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:29900";

/// Default tunnel endpoint address.
pub const DEFAULT_TUNNEL: &str = "127.0.0.1:29901";

/// Relay configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Raw TCP listen address.
    pub listen: SocketAddr,

    /// Tunnel endpoint that receives sniffed tunnel connections.
    pub tunnel: String,

    /// Direct target for everything else.
    pub target: String,

    /// Suppress per-session logging.
    pub quiet: bool,

    /// Classify connections; when off every connection goes to `target`.
    pub sniff: bool,

    /// Only accept this protocol version as tunnel traffic.
    pub protocol_version: Option<u8>,

    /// Maximum concurrent sessions.
    pub max_connections: usize,

    /// Backend dial timeout.
    pub connect_timeout: Option<Duration>,

    /// Preamble read timeout.
    pub sniff_timeout: Option<Duration>,

    /// Per-direction idle timeout.
    pub idle_timeout: Option<Duration>,

    /// Propagate half-close instead of closing the session on first EOF.
    pub half_close: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_raw = lookup("KCPRAW_LISTEN").unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen: SocketAddr = listen_raw
            .parse()
            .with_context(|| format!("KCPRAW_LISTEN must be a socket address, got {listen_raw:?}."))?;

        let tunnel = lookup("KCPRAW_TUNNEL").unwrap_or_else(|| DEFAULT_TUNNEL.to_string());

        let target = lookup("KCPRAW_TARGET")
            .filter(|v| !v.is_empty())
            .context("Missing direct target. Set KCPRAW_TARGET (host:port).")?;

        let quiet = parse_flag(lookup("KCPRAW_QUIET"), false);
        let sniff = parse_flag(lookup("KCPRAW_SNIFF"), true);
        let half_close = parse_flag(lookup("KCPRAW_HALF_CLOSE"), false);

        let protocol_version: Option<u8> = lookup("KCPRAW_PROTOCOL_VERSION")
            .map(|v| v.parse())
            .transpose()
            .context("KCPRAW_PROTOCOL_VERSION must be 1 or 2.")?;
        if let Some(version) = protocol_version {
            if !kcpraw_frame::is_supported_version(version) {
                bail!("KCPRAW_PROTOCOL_VERSION must be 1 or 2, got {version}.");
            }
        }

        let max_connections: usize = lookup("KCPRAW_MAX_CONNECTIONS")
            .map(|v| v.parse())
            .transpose()
            .context("KCPRAW_MAX_CONNECTIONS must be an integer.")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .max(1);

        let connect_timeout = parse_millis(&lookup, "KCPRAW_CONNECT_TIMEOUT_MS")?;
        let sniff_timeout = parse_millis(&lookup, "KCPRAW_SNIFF_TIMEOUT_MS")?;
        let idle_timeout = parse_millis(&lookup, "KCPRAW_IDLE_TIMEOUT_MS")?;

        let default_level = if quiet { "error" } else { "info" };
        let log_level = lookup("KCPRAW_LOG_LEVEL").unwrap_or_else(|| default_level.to_string());

        Ok(Self {
            listen,
            tunnel,
            target,
            quiet,
            sniff,
            protocol_version,
            max_connections,
            connect_timeout,
            sniff_timeout,
            idle_timeout,
            half_close,
            log_level,
        })
    }

    /// Listener configuration derived from this config.
    pub fn listener_config(&self) -> ListenerConfig {
        let mut config = ListenerConfig::new(self.listen);
        config.max_connections = self.max_connections;
        config.sniff_enabled = self.sniff;
        config.sniff = SniffConfig {
            required_version: self.protocol_version,
            timeout: self.sniff_timeout,
        };
        config.relay = RelayConfig {
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_timeout: self.idle_timeout,
            half_close: self.half_close,
        };
        config
    }

    /// Dispatcher for the configured backends.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.tunnel.clone(), self.target.clone())
            .with_connect_timeout(self.connect_timeout)
    }
}

fn parse_flag(value: Option<String>, default: bool) -> bool {
    match value {
        Some(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        None => default,
    }
}

fn parse_millis<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    let millis: Option<u64> = lookup(key)
        .map(|v| v.parse())
        .transpose()
        .with_context(|| format!("{key} must be an integer (milliseconds)."))?;
    Ok(millis.filter(|ms| *ms > 0).map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("KCPRAW_TARGET", "127.0.0.1:22")]).unwrap();
        assert_eq!(config.listen, DEFAULT_LISTEN.parse().unwrap());
        assert_eq!(config.tunnel, DEFAULT_TUNNEL);
        assert_eq!(config.target, "127.0.0.1:22");
        assert!(!config.quiet);
        assert!(config.sniff);
        assert!(!config.half_close);
        assert!(config.protocol_version.is_none());
        assert!(config.connect_timeout.is_none());
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_missing_target() {
        assert!(load(&[]).is_err());
        assert!(load(&[("KCPRAW_TARGET", "")]).is_err());
    }

    #[test]
    fn test_quiet_lowers_log_level() {
        let config = load(&[("KCPRAW_TARGET", "t:1"), ("KCPRAW_QUIET", "true")]).unwrap();
        assert!(config.quiet);
        assert_eq!(config.log_level, "error");
    }

    #[test]
    fn test_protocol_version() {
        let config = load(&[("KCPRAW_TARGET", "t:1"), ("KCPRAW_PROTOCOL_VERSION", "2")]).unwrap();
        assert_eq!(config.protocol_version, Some(2));
        assert!(load(&[("KCPRAW_TARGET", "t:1"), ("KCPRAW_PROTOCOL_VERSION", "3")]).is_err());
        assert!(load(&[("KCPRAW_TARGET", "t:1"), ("KCPRAW_PROTOCOL_VERSION", "x")]).is_err());
    }

    #[test]
    fn test_timeouts_and_listener_config() {
        let config = load(&[
            ("KCPRAW_TARGET", "t:1"),
            ("KCPRAW_LISTEN", "127.0.0.1:4000"),
            ("KCPRAW_SNIFF", "0"),
            ("KCPRAW_SNIFF_TIMEOUT_MS", "250"),
            ("KCPRAW_IDLE_TIMEOUT_MS", "0"),
            ("KCPRAW_MAX_CONNECTIONS", "0"),
            ("KCPRAW_HALF_CLOSE", "1"),
        ])
        .unwrap();

        let listener = config.listener_config();
        assert_eq!(listener.bind_addr, "127.0.0.1:4000".parse().unwrap());
        assert!(!listener.sniff_enabled);
        assert_eq!(listener.sniff.timeout, Some(Duration::from_millis(250)));
        assert!(listener.relay.idle_timeout.is_none());
        assert!(listener.relay.half_close);
        assert_eq!(listener.max_connections, 1);
    }

    #[test]
    fn test_invalid_listen() {
        assert!(load(&[("KCPRAW_TARGET", "t:1"), ("KCPRAW_LISTEN", "nope")]).is_err());
    }
}
