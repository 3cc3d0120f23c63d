use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::{debug, info, warn};

use relaydrop_core::digest::Digest;
use relaydrop_core::error::RelayError;
use relaydrop_core::secret::{DEFAULT_WORDS, Wordlist};
use relaydrop_engine::client::{receive_file, send_file};
use relaydrop_engine::config::normalize_listen_addr;
use relaydrop_engine::tcp::{TcpConnector, TcpListenerFactory};
use relaydrop_engine::{Relay, RelayConfig, RelayHandle, ShutdownPolicy};

use crate::event::{format_size, spawn_event_printer};

/// Upper bound on how often expired pending senders are swept.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// How long the event printer gets to flush the shutdown report.
const PRINTER_SETTLE: Duration = Duration::from_millis(500);

// ── relay ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ShutdownMode {
    /// Let running transfers finish (bounded by --drain-timeout).
    Drain,
    /// Abort running transfers immediately.
    Cancel,
}

#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Address to listen on: `host:port`, `:port` or a bare port.
    #[arg(default_value = ":4242")]
    listen: String,

    /// Seconds a peer has to complete its handshake.
    #[arg(long, default_value_t = 10, value_name = "SECS")]
    handshake_timeout: u64,

    /// Copy buffer size of each relay worker.
    #[arg(long, default_value_t = 8192, value_name = "BYTES")]
    buffer_size: usize,

    /// Evict senders that waited this long for a receiver. Off by default.
    #[arg(long, value_name = "SECS")]
    pending_ttl: Option<u64>,

    /// What to do with running transfers on SIGINT/SIGTERM.
    #[arg(long, value_enum, default_value_t = ShutdownMode::Drain)]
    shutdown: ShutdownMode,

    /// Seconds to wait for running transfers when draining.
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    drain_timeout: u64,
}

impl RelayArgs {
    fn to_config(&self) -> Result<RelayConfig, RelayError> {
        let usage = |message: String| RelayError::Usage { message };

        let listen_addr = normalize_listen_addr(&self.listen).map_err(|e| usage(format!("{e:#}")))?;
        if self.handshake_timeout == 0 {
            return Err(usage("--handshake-timeout must be at least 1 second".into()));
        }
        if self.buffer_size == 0 {
            return Err(usage("--buffer-size must be positive".into()));
        }
        let pending_ttl = match self.pending_ttl {
            Some(0) => return Err(usage("--pending-ttl must be at least 1 second".into())),
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };
        let shutdown_policy = match self.shutdown {
            ShutdownMode::Drain => ShutdownPolicy::Drain {
                timeout: Duration::from_secs(self.drain_timeout),
            },
            ShutdownMode::Cancel => ShutdownPolicy::Cancel,
        };

        let defaults = RelayConfig::default();
        Ok(RelayConfig {
            listen_addr,
            handshake_timeout: Duration::from_secs(self.handshake_timeout),
            copy_buffer_size: self.buffer_size,
            pending_ttl,
            sweep_interval: pending_ttl.map_or(defaults.sweep_interval, |ttl| {
                ttl.min(MAX_SWEEP_INTERVAL)
            }),
            shutdown_policy,
        })
    }
}

pub async fn run_relay(args: RelayArgs) -> Result<()> {
    let config = args.to_config()?;
    let server = Relay::bind(&TcpListenerFactory, config).await?;
    let handle = server.handle();

    let printer = spawn_event_printer(handle.subscribe());
    spawn_signal_listener(handle);

    let report = server.run().await;
    if tokio::time::timeout(PRINTER_SETTLE, printer).await.is_err() {
        debug!("Event printer did not finish before exit");
    }
    info!(
        unmatched = report.unmatched_closed,
        cancelled = report.workers_cancelled,
        "Relay exited"
    );
    Ok(())
}

/// First SIGINT/SIGTERM starts the shutdown sequence; a second one exits
/// immediately.
fn spawn_signal_listener(handle: RelayHandle) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutting down, signal again to force");
        handle.shutdown();

        wait_for_signal().await;
        warn!("Forced exit");
        std::process::exit(1);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM, only Ctrl-C will stop the relay");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

// ── send ────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Relay address, `host:port`.
    relay: String,

    /// File to send.
    file: PathBuf,

    /// Number of words in the generated secret.
    #[arg(long, default_value_t = DEFAULT_WORDS)]
    words: usize,

    /// Word list to draw the secret from (one word per line). Defaults to
    /// the system dictionary, or a built-in list when it is missing.
    #[arg(long, value_name = "PATH")]
    dictionary: Option<PathBuf>,
}

pub async fn run_send(args: SendArgs) -> Result<()> {
    let meta = tokio::fs::metadata(&args.file)
        .await
        .map_err(|e| RelayError::io(format!("cannot read {}", args.file.display()), e))?;
    if !meta.is_file() {
        return Err(RelayError::Usage {
            message: format!("{} is not a regular file", args.file.display()),
        }
        .into());
    }

    let words = match &args.dictionary {
        Some(path) => Wordlist::from_file(path)?,
        None => Wordlist::load_or_builtin(None),
    };
    let secret = words.generate(args.words)?;
    let digest = Digest::from_secret(&secret);

    // The only line this program ever writes to stdout.
    println!("{secret}");
    info!(
        file = %args.file.display(),
        size = %format_size(meta.len()),
        "Give the secret above to the receiver"
    );

    let report = send_file(&TcpConnector, &args.relay, &digest, &args.file)
        .await
        .with_context(|| format!("sending {}", args.file.display()))?;
    info!(
        file = %report.filename,
        size = %format_size(report.bytes),
        "Sent"
    );
    Ok(())
}

// ── receive ─────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct ReceiveArgs {
    /// Relay address, `host:port`.
    relay: String,

    /// Secret printed by the sender.
    secret: String,

    /// Directory to save into (the sender's filename is kept) or the exact
    /// file path to write.
    #[arg(default_value = ".")]
    output: PathBuf,
}

pub async fn run_receive(args: ReceiveArgs) -> Result<()> {
    let secret = args.secret.trim();
    if secret.is_empty() {
        return Err(RelayError::Usage {
            message: "the secret is empty".into(),
        }
        .into());
    }
    let digest = Digest::from_secret(secret);

    let report = receive_file(&TcpConnector, &args.relay, &digest, &args.output).await?;
    info!(
        file = %report.path.display(),
        size = %format_size(report.bytes),
        "Received"
    );
    Ok(())
}
