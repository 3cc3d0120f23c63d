use crate::reaper::WorkerId;
use crate::worker::WorkerOutcome;

// ── Relay events (relay → observers) ────────────────────────────────

/// Events emitted by a running relay for the CLI and tests to observe.
///
/// Delivery is best effort: a lagging subscriber misses events, the relay
/// never waits for one.
#[derive(Clone, Debug)]
pub enum RelayEvent {
    /// The listener is bound and accepting connections on `addr`.
    Listening { addr: String },
    /// A sender finished its handshake and is waiting for a receiver.
    SenderRegistered {
        digest: String,
        peer: String,
        filename: String,
    },
    /// A pair was matched and handed to a relay worker.
    Paired {
        worker_id: WorkerId,
        digest: String,
        sender_peer: String,
        receiver_peer: String,
    },
    /// A connection was dropped during its handshake (bad role, short
    /// read, timeout).
    HandshakeRejected { peer: String, reason: String },
    /// A receiver arrived with a digest no sender is waiting on.
    NoPeer { peer: String, digest: String },
    /// A receiver claimed a pending sender that had outlived the TTL.
    StaleEntry { digest: String },
    /// The sweeper evicted a pending sender that outlived the TTL.
    PendingExpired { digest: String, peer: String },
    /// A relay worker finished and was reaped.
    TransferFinished {
        worker_id: WorkerId,
        outcome: WorkerOutcome,
    },
    /// The shutdown sequence completed; no task of this relay is left.
    ShutdownComplete { report: ShutdownReport },
}

/// What the shutdown sequence had to clean up.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Pending senders closed without ever being paired.
    pub unmatched_closed: usize,
    /// Connections still mid-handshake when the listener stopped.
    pub handshakes_aborted: usize,
    /// Workers that had to be cancelled because draining ran out of time
    /// or the policy said not to wait.
    pub workers_cancelled: usize,
    /// Workers reaped during the shutdown sequence, cancelled or not.
    pub workers_reaped: usize,
}
