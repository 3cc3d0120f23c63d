//! The relay worker: one task per matched pair, piping sender bytes to the
//! receiver.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relaydrop_core::error::RelayError;
use relaydrop_core::protocol::encode_filename_header_to_bytes;
use relaydrop_core::transport::Connection;

use crate::pairing::MatchedPair;
use crate::reaper::WorkerId;

/// How a relay worker ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The sender closed its connection and every byte reached the receiver.
    Completed { bytes: u64 },
    /// A read or write failed; only this pair is affected.
    Failed { bytes: u64, reason: String },
    /// The relay cancelled the transfer during shutdown.
    Cancelled { bytes: u64 },
    /// The task was dropped before producing an outcome.
    Aborted,
    /// The task panicked.
    Panicked,
}

impl WorkerOutcome {
    /// Payload bytes delivered to the receiver, when known.
    #[must_use]
    pub fn bytes(&self) -> Option<u64> {
        match self {
            Self::Completed { bytes } | Self::Failed { bytes, .. } | Self::Cancelled { bytes } => {
                Some(*bytes)
            }
            Self::Aborted | Self::Panicked => None,
        }
    }
}

enum Flow {
    SenderFinished,
    Cancelled,
}

/// Owns exactly the two connections of one pair for its whole lifetime.
/// Never touches the pairing table.
pub struct RelayWorker<C> {
    pair: MatchedPair<C>,
    buffer_size: usize,
    cancel: CancellationToken,
}

impl<C: Connection> RelayWorker<C> {
    pub fn new(pair: MatchedPair<C>, buffer_size: usize, cancel: CancellationToken) -> Self {
        Self {
            pair,
            buffer_size,
            cancel,
        }
    }

    /// Writes the filename header, streams the payload, then closes both
    /// connections whatever the result.
    pub async fn run(self, worker_id: WorkerId) -> WorkerOutcome {
        let MatchedPair {
            digest,
            filename,
            mut sender,
            mut receiver,
            sender_peer,
            receiver_peer,
            waited,
        } = self.pair;

        info!(
            worker_id,
            digest = %digest.short(),
            sender = %sender_peer,
            receiver = %receiver_peer,
            waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            "Relay worker started"
        );

        let mut bytes = 0u64;
        let result = pump(
            &mut sender,
            &mut receiver,
            &filename,
            self.buffer_size,
            &self.cancel,
            &mut bytes,
        )
        .await;

        if let Err(e) = receiver.shutdown().await {
            debug!(worker_id, error = %e, "Receiver already gone at close");
        }
        drop(sender);
        drop(receiver);

        match result {
            Ok(Flow::SenderFinished) => {
                info!(worker_id, bytes, "Transfer complete");
                WorkerOutcome::Completed { bytes }
            }
            Ok(Flow::Cancelled) => {
                warn!(worker_id, bytes, "Transfer cancelled by shutdown");
                WorkerOutcome::Cancelled { bytes }
            }
            Err(e) => {
                let reason = e.chain();
                warn!(worker_id, bytes, error = %reason, "Transfer failed");
                WorkerOutcome::Failed { bytes, reason }
            }
        }
    }
}

/// The header frame, then the copy loop. Every read and write races the
/// cancellation token.
async fn pump<C: Connection>(
    sender: &mut C,
    receiver: &mut C,
    filename: &[u8],
    buffer_size: usize,
    cancel: &CancellationToken,
    bytes: &mut u64,
) -> Result<Flow, RelayError> {
    let header = encode_filename_header_to_bytes(filename)
        .map_err(|e| RelayError::protocol(e.to_string()))?;

    tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(Flow::Cancelled),
        res = receiver.write_all(&header) => {
            res.map_err(|e| RelayError::io("writing filename header to receiver", e))?;
        }
    }

    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(Flow::Cancelled),
            res = sender.read(&mut buf) => {
                res.map_err(|e| RelayError::io("reading from sender", e))?
            }
        };
        if n == 0 {
            return Ok(Flow::SenderFinished);
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(Flow::Cancelled),
            res = receiver.write_all(&buf[..n]) => {
                res.map_err(|e| RelayError::io("writing to receiver", e))?;
            }
        }
        *bytes += n as u64;
    }
}
