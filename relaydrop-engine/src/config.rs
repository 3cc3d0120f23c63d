use std::time::Duration;

use anyhow::{Context, Result, ensure};

/// Port used when the operator gives neither `host:port` nor `:port`.
pub const DEFAULT_PORT: u16 = 4242;

/// What happens to in-flight transfers when the relay is told to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Let running transfers finish, up to `timeout`, then cancel the rest.
    Drain { timeout: Duration },
    /// Cancel every running transfer at its next read or write. Receivers
    /// may be left with a truncated file.
    Cancel,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self::Drain {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration shared by every component of a relay.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Address the listener binds to, already normalized to `host:port`.
    pub listen_addr: String,
    /// Upper bound on the whole handshake of one connection. A peer that
    /// has not sent its role, digest and filename by then is dropped.
    pub handshake_timeout: Duration,
    /// Size of the buffer each relay worker copies through.
    pub copy_buffer_size: usize,
    /// Unmatched senders older than this are evicted. `None` keeps them
    /// until a receiver arrives or the relay stops.
    pub pending_ttl: Option<Duration>,
    /// How often expired pending senders are swept when a TTL is set.
    pub sweep_interval: Duration,
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            handshake_timeout: Duration::from_secs(10),
            copy_buffer_size: 8192,
            pending_ttl: None,
            sweep_interval: Duration::from_secs(5),
            shutdown_policy: ShutdownPolicy::default(),
        }
    }
}

impl RelayConfig {
    /// Checks the values a listener and its workers cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.copy_buffer_size > 0, "copy buffer size must be positive");
        ensure!(
            !self.handshake_timeout.is_zero(),
            "handshake timeout must be positive"
        );
        ensure!(
            !self.sweep_interval.is_zero(),
            "sweep interval must be positive"
        );
        Ok(())
    }
}

/// Normalizes a listen address given as `host:port`, `:port` or `port`.
///
/// A missing host means every IPv4 interface.
pub fn normalize_listen_addr(input: &str) -> Result<String> {
    let input = input.trim();
    let (host, port) = match input.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => ("", input),
    };
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in listen address {input:?}"))?;
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    Ok(format!("{host}:{port}"))
}
