//! In-memory transport backed by [`tokio::io::duplex`] pipes, used by the
//! unit tests of the handshake, worker and reaper.

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use relaydrop_core::transport::Connection;

/// Pipe capacity. Small enough that a stalled reader applies back-pressure.
const PIPE_CAPACITY: usize = 64 * 1024;

pub struct MemoryConnection {
    stream: DuplexStream,
    peer: String,
}

/// Creates a connected pair: `(relay side, peer side)`.
pub fn pair(peer: &str) -> (MemoryConnection, MemoryConnection) {
    let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
    (
        MemoryConnection {
            stream: a,
            peer: peer.to_string(),
        },
        MemoryConnection {
            stream: b,
            peer: "relay".to_string(),
        },
    )
}

impl MemoryConnection {
    /// Reads until EOF and returns everything received.
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        self.stream
            .read_to_end(&mut out)
            .await
            .expect("in-memory read");
        out
    }
}

impl Connection for MemoryConnection {
    fn peer(&self) -> String {
        self.peer.clone()
    }

    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = anyhow::Result<usize>> + Send + 'a {
        async move {
            self.stream
                .read(buf)
                .await
                .context("failed to read from pipe")
        }
    }

    fn write_all<'a>(
        &'a mut self,
        buf: &'a [u8],
    ) -> impl Future<Output = anyhow::Result<()>> + Send + 'a {
        async move {
            self.stream
                .write_all(buf)
                .await
                .context("failed to write to pipe")
        }
    }

    fn shutdown(&mut self) -> impl Future<Output = anyhow::Result<()>> + Send + '_ {
        async move {
            self.stream
                .shutdown()
                .await
                .context("failed to shut down pipe")
        }
    }
}
