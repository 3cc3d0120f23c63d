use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use relaydrop_engine::RelayEvent;
use relaydrop_engine::worker::WorkerOutcome;

/// Formats a byte count for humans.
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn short(digest: &str) -> &str {
    digest.get(..8).unwrap_or(digest)
}

/// Renders one relay event as an operator-facing line.
pub fn describe(event: &RelayEvent) -> String {
    match event {
        RelayEvent::Listening { addr } => format!("  ✔ Relay listening on {addr}"),
        RelayEvent::SenderRegistered {
            digest,
            peer,
            filename,
        } => format!(
            "  ⏳ {peer} waiting to send \"{filename}\" [{}]",
            short(digest)
        ),
        RelayEvent::Paired {
            worker_id,
            sender_peer,
            receiver_peer,
            ..
        } => format!("  🤝 Transfer #{worker_id}: {sender_peer} → {receiver_peer}"),
        RelayEvent::HandshakeRejected { peer, reason } => {
            format!("  ⚠ Dropped {peer}: {reason}")
        }
        RelayEvent::NoPeer { peer, digest } => {
            format!("  ❔ {peer} asked for [{}], nobody is sending it", short(digest))
        }
        RelayEvent::StaleEntry { digest } => {
            format!("  ⌛ [{}] expired before its receiver arrived", short(digest))
        }
        RelayEvent::PendingExpired { digest, peer } => {
            format!("  ⌛ Evicted {peer} [{}] after waiting too long", short(digest))
        }
        RelayEvent::TransferFinished { worker_id, outcome } => {
            let moved = outcome.bytes().map(format_size).unwrap_or_default();
            match outcome {
                WorkerOutcome::Completed { .. } => {
                    format!("  🎉 Transfer #{worker_id} complete, {moved}")
                }
                WorkerOutcome::Failed { reason, .. } => {
                    format!("  ❌ Transfer #{worker_id} failed after {moved}: {reason}")
                }
                WorkerOutcome::Cancelled { .. } => {
                    format!("  ⏹ Transfer #{worker_id} cancelled after {moved}")
                }
                WorkerOutcome::Aborted | WorkerOutcome::Panicked => {
                    format!("  ❌ Transfer #{worker_id} ended abnormally ({outcome:?})")
                }
            }
        }
        RelayEvent::ShutdownComplete { report } => format!(
            "  👋 Relay stopped: {} unmatched closed, {} cancelled, {} reaped",
            report.unmatched_closed, report.workers_cancelled, report.workers_reaped
        ),
    }
}

/// Spawns a task that prints relay events. It ends after the shutdown
/// report, or when the relay is gone.
pub fn spawn_event_printer(mut events_rx: broadcast::Receiver<RelayEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(event) => {
                    println!("{}", describe(&event));
                    if matches!(event, RelayEvent::ShutdownComplete { .. }) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    println!("  ⚠ Missed {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
