//! The pairing table: digest → the one sender waiting for it.
//!
//! Every lookup, insert, claim and drain happens inside a single critical
//! section, so the check "is someone already waiting for this digest?" and
//! the action taken on its answer can never interleave with another
//! handshake presenting the same digest.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use relaydrop_core::digest::Digest;

/// A sender that completed its handshake and is waiting for a receiver.
pub struct PendingTransfer<C> {
    pub digest: Digest,
    pub filename: Vec<u8>,
    pub sender: C,
    pub sender_peer: String,
    pub registered_at: Instant,
}

impl<C> PendingTransfer<C> {
    /// Attaches the receiver, turning the pending entry into a pair ready
    /// for a relay worker.
    pub fn attach_receiver(self, receiver: C, receiver_peer: String) -> MatchedPair<C> {
        MatchedPair {
            digest: self.digest,
            filename: self.filename,
            sender: self.sender,
            receiver,
            sender_peer: self.sender_peer,
            receiver_peer,
            waited: self.registered_at.elapsed(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.is_some_and(|ttl| now.saturating_duration_since(self.registered_at) > ttl)
    }
}

/// Both ends of one transfer. Owned by exactly one relay worker.
pub struct MatchedPair<C> {
    pub digest: Digest,
    pub filename: Vec<u8>,
    pub sender: C,
    pub receiver: C,
    pub sender_peer: String,
    pub receiver_peer: String,
    /// How long the sender waited in the table.
    pub waited: Duration,
}

/// A connection that finished its handshake, as seen by the table.
pub enum Arrival<C> {
    Sender {
        digest: Digest,
        filename: Vec<u8>,
        conn: C,
        peer: String,
    },
    Receiver {
        digest: Digest,
        conn: C,
        peer: String,
    },
}

impl<C> Arrival<C> {
    pub fn digest(&self) -> &Digest {
        match self {
            Self::Sender { digest, .. } | Self::Receiver { digest, .. } => digest,
        }
    }

    fn into_conn(self) -> (C, String) {
        match self {
            Self::Sender { conn, peer, .. } | Self::Receiver { conn, peer, .. } => (conn, peer),
        }
    }
}

/// Result of presenting an [`Arrival`] to the table.
pub enum Rendezvous<C> {
    /// No one was waiting and the arrival was a sender: it is now pending.
    Registered,
    /// Someone was waiting: the entry was removed and paired with the
    /// arrival, which acts as the receiver whatever role it announced.
    Matched(MatchedPair<C>),
    /// Someone was waiting, but longer than the pending TTL. The entry was
    /// removed; both connections are handed back to be closed.
    Stale {
        pending: PendingTransfer<C>,
        receiver: C,
    },
    /// A receiver arrived with no sender waiting for its digest.
    NoPeer(C),
    /// The relay is shutting down and accepts no new pairings.
    Closed(C),
}

struct TableState<C> {
    pending: HashMap<Digest, PendingTransfer<C>>,
    closed: bool,
}

/// Process-wide map from digest to the single pending sender for it.
///
/// Invariant: at most one entry per digest, and never a matched one:
/// matching removes the entry in the same critical section that finds it.
pub struct PairingTable<C> {
    state: Mutex<TableState<C>>,
    pending_ttl: Option<Duration>,
    count_tx: watch::Sender<usize>,
}

impl<C> PairingTable<C> {
    #[must_use]
    pub fn new(pending_ttl: Option<Duration>) -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            state: Mutex::new(TableState {
                pending: HashMap::new(),
                closed: false,
            }),
            pending_ttl,
            count_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, len: usize) {
        self.count_tx.send_replace(len);
    }

    /// Atomically looks up the arrival's digest and either registers it,
    /// pairs it, or rejects it.
    pub fn rendezvous(&self, arrival: Arrival<C>) -> Rendezvous<C> {
        let mut state = self.lock();
        if state.closed {
            let (conn, _) = arrival.into_conn();
            return Rendezvous::Closed(conn);
        }

        let outcome = match state.pending.entry(*arrival.digest()) {
            Entry::Occupied(entry) => {
                let pending = entry.remove();
                let (receiver, receiver_peer) = arrival.into_conn();
                if pending.is_expired(self.pending_ttl, Instant::now()) {
                    Rendezvous::Stale { pending, receiver }
                } else {
                    Rendezvous::Matched(pending.attach_receiver(receiver, receiver_peer))
                }
            }
            Entry::Vacant(slot) => match arrival {
                Arrival::Sender {
                    digest,
                    filename,
                    conn,
                    peer,
                } => {
                    slot.insert(PendingTransfer {
                        digest,
                        filename,
                        sender: conn,
                        sender_peer: peer,
                        registered_at: Instant::now(),
                    });
                    Rendezvous::Registered
                }
                Arrival::Receiver { conn, .. } => Rendezvous::NoPeer(conn),
            },
        };

        self.publish(state.pending.len());
        outcome
    }

    /// Removes every entry older than the pending TTL. Does nothing when no
    /// TTL is configured.
    pub fn evict_expired(&self, now: Instant) -> Vec<PendingTransfer<C>> {
        if self.pending_ttl.is_none() {
            return Vec::new();
        }
        let mut state = self.lock();
        let expired: Vec<Digest> = state
            .pending
            .values()
            .filter(|p| p.is_expired(self.pending_ttl, now))
            .map(|p| p.digest)
            .collect();
        let evicted = expired
            .iter()
            .filter_map(|d| state.pending.remove(d))
            .collect();
        self.publish(state.pending.len());
        evicted
    }

    /// Refuses every later rendezvous and hands back all unmatched senders.
    pub fn close(&self) -> Vec<PendingTransfer<C>> {
        let mut state = self.lock();
        state.closed = true;
        let drained = state.pending.drain().map(|(_, p)| p).collect();
        self.publish(0);
        drained
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, digest: &Digest) -> bool {
        self.lock().pending.contains_key(digest)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Watches the number of pending senders; updated on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }
}
