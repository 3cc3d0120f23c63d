use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use relaydrop_core::transport::{Listener, ListenerFactory};

use crate::config::{RelayConfig, ShutdownPolicy};
use crate::event::{RelayEvent, ShutdownReport};
use crate::handshake::{RelayContext, close_connection, handle_connection};
use crate::pairing::PairingTable;
use crate::reaper::{Completion, Reaper, join_queue};

/// Pause after a failed `accept` so a persistent error (fd exhaustion)
/// does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

// ── Relay handle ────────────────────────────────────────────────────

/// Cloneable control surface for a running relay: request shutdown,
/// observe events, watch the pairing table.
#[derive(Clone)]
pub struct RelayHandle {
    shutdown: CancellationToken,
    events_tx: broadcast::Sender<RelayEvent>,
    pending_rx: watch::Receiver<usize>,
}

impl RelayHandle {
    /// Asks the relay to stop. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events_tx.subscribe()
    }

    /// Number of senders currently waiting for a receiver.
    pub fn pending_count(&self) -> usize {
        *self.pending_rx.borrow()
    }

    /// Waits until exactly `n` senders are pending. Returns `false` if the
    /// relay is gone before that happens.
    pub async fn wait_for_pending(&self, n: usize) -> bool {
        let mut rx = self.pending_rx.clone();
        rx.wait_for(|count| *count == n).await.is_ok()
    }
}

// ── Relay ───────────────────────────────────────────────────────────

/// Entry point for running a relay.
pub struct Relay;

impl Relay {
    /// Validates `config` and binds the listener. Binding is the only
    /// failure that prevents the relay from starting.
    pub async fn bind<F: ListenerFactory>(
        factory: &F,
        config: RelayConfig,
    ) -> Result<RelayServer<F::L>> {
        config.validate().context("invalid relay configuration")?;
        let listener = factory
            .bind(&config.listen_addr)
            .await
            .with_context(|| format!("failed to start relay on {}", config.listen_addr))?;

        let (joins, reaper) = join_queue();
        let (events, _) = broadcast::channel(256);
        let table = PairingTable::new(config.pending_ttl);
        let pending_rx = table.subscribe();
        let shutdown = CancellationToken::new();

        debug!(addr = %listener.local_addr(), "Relay bound");

        Ok(RelayServer {
            listener,
            ctx: Arc::new(RelayContext {
                config,
                table,
                joins,
                events,
                worker_cancel: CancellationToken::new(),
            }),
            reaper,
            shutdown,
            pending_rx,
        })
    }
}

/// A bound relay, ready to [`run`](RelayServer::run).
pub struct RelayServer<L: Listener> {
    listener: L,
    ctx: Arc<RelayContext<L::Conn>>,
    reaper: Reaper,
    shutdown: CancellationToken,
    pending_rx: watch::Receiver<usize>,
}

impl<L: Listener> RelayServer<L> {
    /// Address actually bound, with the OS-assigned port when `:0` was
    /// requested.
    pub fn local_addr(&self) -> String {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            shutdown: self.shutdown.clone(),
            events_tx: self.ctx.events.clone(),
            pending_rx: self.pending_rx.clone(),
        }
    }

    /// Accepts and dispatches connections until shutdown is requested,
    /// then runs the shutdown sequence and reports what it cleaned up.
    ///
    /// Every accepted connection gets its own handshake task, so a slow
    /// peer never delays the next accept.
    pub async fn run(self) -> ShutdownReport {
        let RelayServer {
            mut listener,
            ctx,
            mut reaper,
            shutdown,
            pending_rx: _,
        } = self;

        let addr = listener.local_addr();
        info!(addr = %addr, "Relay listening");
        let _ = ctx.events.send(RelayEvent::Listening { addr });

        let mut handshakes: JoinSet<()> = JoinSet::new();
        let mut closers: JoinSet<()> = JoinSet::new();
        let mut sweep = ctx.config.pending_ttl.map(|_| {
            let mut sweep = interval(ctx.config.sweep_interval);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
            sweep
        });

        loop {
            tokio::select! {
                biased;

                // ── Shutdown ────────────────────────────────────────
                () = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                // ── Finished workers ────────────────────────────────
                Some(done) = reaper.next() => {
                    finish_worker(&ctx, &mut reaper, done).await;
                }

                // ── Finished handshakes ─────────────────────────────
                Some(res) = handshakes.join_next(), if !handshakes.is_empty() => {
                    if matches!(res, Err(ref e) if e.is_panic()) {
                        error!("Handshake task panicked");
                    }
                }

                Some(_) = closers.join_next(), if !closers.is_empty() => {}

                // ── New connections ─────────────────────────────────
                accepted = listener.accept() => match accepted {
                    Ok(conn) => {
                        handshakes.spawn(handle_connection(Arc::clone(&ctx), conn));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        sleep(ACCEPT_BACKOFF).await;
                    }
                },

                // ── Expired pending senders ─────────────────────────
                () = next_sweep(&mut sweep) => {
                    for pending in ctx.table.evict_expired(std::time::Instant::now()) {
                        info!(
                            digest = %pending.digest.short(),
                            peer = %pending.sender_peer,
                            "Evicting expired pending sender"
                        );
                        let _ = ctx.events.send(RelayEvent::PendingExpired {
                            digest: pending.digest.to_string(),
                            peer: pending.sender_peer.clone(),
                        });
                        closers.spawn(async move {
                            close_connection(pending.sender, &pending.sender_peer).await;
                        });
                    }
                }
            }
        }

        shutdown_sequence(listener, ctx, reaper, handshakes, closers).await
    }
}

async fn next_sweep(sweep: &mut Option<Interval>) {
    match sweep {
        Some(sweep) => {
            sweep.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn finish_worker<C>(ctx: &RelayContext<C>, reaper: &mut Reaper, done: Completion) {
    let Completion { worker_id, outcome } = reaper.reap(done).await;
    debug!(worker_id, outcome = ?outcome, "Relay worker reaped");
    let _ = ctx
        .events
        .send(RelayEvent::TransferFinished { worker_id, outcome });
}

/// Stops accepting, closes what never paired, then drains or cancels the
/// workers according to the shutdown policy. Returns only once every task
/// the relay spawned has been joined.
async fn shutdown_sequence<L: Listener>(
    listener: L,
    ctx: Arc<RelayContext<L::Conn>>,
    mut reaper: Reaper,
    mut handshakes: JoinSet<()>,
    mut closers: JoinSet<()>,
) -> ShutdownReport {
    let mut report = ShutdownReport::default();

    drop(listener);
    debug!("Listener closed");

    // Only tasks still mid-handshake count; finished ones join as `Ok`.
    handshakes.abort_all();
    while let Some(res) = handshakes.join_next().await {
        if matches!(res, Err(ref e) if e.is_cancelled()) {
            report.handshakes_aborted += 1;
        }
    }
    while closers.join_next().await.is_some() {}

    let unmatched = ctx.table.close();
    report.unmatched_closed = unmatched.len();
    for pending in unmatched {
        close_connection(pending.sender, &pending.sender_peer).await;
    }
    info!(
        unmatched = report.unmatched_closed,
        handshakes = report.handshakes_aborted,
        workers = reaper.outstanding(),
        "Listener and pending senders closed"
    );

    let drain_timeout = match ctx.config.shutdown_policy {
        ShutdownPolicy::Drain { timeout } => Some(timeout),
        ShutdownPolicy::Cancel => None,
    };
    if let Some(timeout) = drain_timeout.filter(|_| reaper.outstanding() > 0) {
        info!(
            workers = reaper.outstanding(),
            timeout_s = timeout.as_secs(),
            "Draining relay workers"
        );
        let deadline = Instant::now() + timeout;
        while reaper.outstanding() > 0 {
            match timeout_at(deadline, reaper.next()).await {
                Ok(Some(done)) => {
                    finish_worker(&ctx, &mut reaper, done).await;
                    report.workers_reaped += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(workers = reaper.outstanding(), "Drain timed out");
                    break;
                }
            }
        }
    }

    report.workers_cancelled = reaper.outstanding();
    if report.workers_cancelled > 0 {
        warn!(workers = report.workers_cancelled, "Cancelling relay workers");
        ctx.worker_cancel.cancel();
    }
    while reaper.outstanding() > 0 {
        let Some(done) = reaper.next().await else {
            break;
        };
        finish_worker(&ctx, &mut reaper, done).await;
        report.workers_reaped += 1;
    }

    info!(
        unmatched = report.unmatched_closed,
        handshakes = report.handshakes_aborted,
        cancelled = report.workers_cancelled,
        reaped = report.workers_reaped,
        "Relay stopped"
    );
    let _ = ctx.events.send(RelayEvent::ShutdownComplete {
        report: report.clone(),
    });
    report
}
