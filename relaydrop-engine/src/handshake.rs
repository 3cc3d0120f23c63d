//! Per-connection handshake: identify the relay, read the peer's hello,
//! then present it to the pairing table and act on the answer.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relaydrop_core::error::{RelayError, Result};
use relaydrop_core::filename::sanitize_filename;
use relaydrop_core::protocol::{Hello, RELAY_IDENTITY, Role, read_hello};
use relaydrop_core::transport::Connection;

use crate::config::RelayConfig;
use crate::event::RelayEvent;
use crate::pairing::{Arrival, PairingTable, Rendezvous};
use crate::reaper::JoinQueue;
use crate::worker::RelayWorker;

/// State shared by every handshake task of one relay.
pub struct RelayContext<C> {
    pub config: RelayConfig,
    pub table: PairingTable<C>,
    pub joins: JoinQueue,
    pub events: broadcast::Sender<RelayEvent>,
    /// Cancelled when the shutdown policy stops waiting for workers.
    pub worker_cancel: CancellationToken,
}

/// Sends the relay identity and reads the peer's hello.
pub async fn handshake<C: Connection>(conn: &mut C) -> Result<Hello> {
    conn.write_all(&RELAY_IDENTITY)
        .await
        .map_err(|e| RelayError::io("writing relay identity", e))?;
    read_hello(conn).await
}

/// Runs the whole lifecycle of one accepted connection up to the point
/// where it is pending, handed to a worker, or closed.
///
/// Errors never escape: they are logged, emitted as events, and end with
/// this connection being dropped.
pub async fn handle_connection<C: Connection>(ctx: Arc<RelayContext<C>>, mut conn: C) {
    let peer = conn.peer();
    debug!(peer = %peer, "Handshake started");

    let hello = match timeout(ctx.config.handshake_timeout, handshake(&mut conn)).await {
        Ok(Ok(hello)) => hello,
        Ok(Err(e)) if e.is_protocol() => {
            reject(&ctx, &peer, e.chain());
            return;
        }
        Ok(Err(e)) => {
            // Gone before the relay could identify itself.
            debug!(peer = %peer, error = %e.chain(), "Handshake aborted by peer");
            let _ = ctx.events.send(RelayEvent::HandshakeRejected {
                peer,
                reason: e.chain(),
            });
            return;
        }
        Err(_) => {
            reject(
                &ctx,
                &peer,
                format!(
                    "handshake timed out after {}s",
                    ctx.config.handshake_timeout.as_secs_f32()
                ),
            );
            return;
        }
    };

    let announced = hello.role;
    let digest = hello.digest;
    let display_name = hello
        .filename
        .as_deref()
        .map(sanitize_filename)
        .unwrap_or_default();
    let arrival = match (hello.role, hello.filename) {
        (Role::Sender, Some(filename)) => Arrival::Sender {
            digest,
            filename,
            conn,
            peer: peer.clone(),
        },
        (Role::Sender, None) | (Role::Receiver, _) => Arrival::Receiver {
            digest,
            conn,
            peer: peer.clone(),
        },
    };

    match ctx.table.rendezvous(arrival) {
        Rendezvous::Registered => {
            info!(
                peer = %peer,
                digest = %digest.short(),
                filename = %display_name,
                "Sender waiting for receiver"
            );
            let _ = ctx.events.send(RelayEvent::SenderRegistered {
                digest: digest.to_string(),
                peer,
                filename: display_name,
            });
        }
        Rendezvous::Matched(pair) => {
            if announced == Role::Sender {
                warn!(
                    peer = %peer,
                    digest = %digest.short(),
                    "Second sender for a pending digest, treating it as the receiver"
                );
            }
            let worker_id = ctx.joins.reserve_id();
            info!(
                worker_id,
                digest = %digest.short(),
                sender = %pair.sender_peer,
                receiver = %pair.receiver_peer,
                "Pair matched"
            );
            let _ = ctx.events.send(RelayEvent::Paired {
                worker_id,
                digest: digest.to_string(),
                sender_peer: pair.sender_peer.clone(),
                receiver_peer: pair.receiver_peer.clone(),
            });
            let worker = RelayWorker::new(
                pair,
                ctx.config.copy_buffer_size,
                ctx.worker_cancel.child_token(),
            );
            ctx.joins.spawn(worker_id, worker.run(worker_id));
        }
        Rendezvous::Stale { pending, receiver } => {
            let err = RelayError::StaleEntry {
                digest: digest.short(),
            };
            warn!(
                sender = %pending.sender_peer,
                receiver = %peer,
                error = %err,
                "Closing both ends of an expired pairing"
            );
            close_connection(pending.sender, &pending.sender_peer).await;
            close_connection(receiver, &peer).await;
            let _ = ctx.events.send(RelayEvent::StaleEntry {
                digest: digest.to_string(),
            });
        }
        Rendezvous::NoPeer(receiver) => {
            info!(peer = %peer, digest = %digest.short(), "No sender waiting for receiver");
            close_connection(receiver, &peer).await;
            let _ = ctx.events.send(RelayEvent::NoPeer {
                peer,
                digest: digest.to_string(),
            });
        }
        Rendezvous::Closed(conn) => {
            debug!(peer = %peer, "Relay shutting down, dropping connection");
            drop(conn);
        }
    }
}

fn reject<C>(ctx: &RelayContext<C>, peer: &str, reason: String) {
    warn!(peer = %peer, reason = %reason, "Handshake rejected");
    let _ = ctx.events.send(RelayEvent::HandshakeRejected {
        peer: peer.to_string(),
        reason,
    });
}

/// Shuts down the write half, then drops the connection.
pub async fn close_connection<C: Connection>(mut conn: C, peer: &str) {
    if let Err(e) = conn.shutdown().await {
        debug!(peer = %peer, error = %e, "Connection already closed");
    }
}
