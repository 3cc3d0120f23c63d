//! Byte-stream seams between the relay and its peers.
//!
//! The relay only ever pipes opaque bytes from a sender to a receiver, so a
//! connection is a read half, a write half and a half-close. TCP lives in
//! `relaydrop-engine`; tests plug in in-memory pipes.

use std::future::Future;

/// One peer of the relay: a sender, a receiver, or a connection that has not
/// said which yet.
///
/// Dropping a connection closes it.
pub trait Connection: Send + 'static {
    /// Remote address used in logs and events (e.g. `"127.0.0.1:54321"`).
    fn peer(&self) -> String;

    /// Reads bytes into `buf`, returning how many bytes were read.
    ///
    /// Returns `Ok(0)` once the peer has shut down its write half.
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = anyhow::Result<usize>> + Send + 'a;

    /// Writes the whole of `buf`. A write that cannot complete is an error.
    fn write_all<'a>(
        &'a mut self,
        buf: &'a [u8],
    ) -> impl Future<Output = anyhow::Result<()>> + Send + 'a;

    /// Half-closes the connection. The peer reads EOF after whatever was
    /// already written.
    fn shutdown(&mut self) -> impl Future<Output = anyhow::Result<()>> + Send + '_;

    /// Reads until `buf` is full or the peer closes, and returns how many
    /// bytes arrived. A count below `buf.len()` means EOF came first.
    fn fill<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = anyhow::Result<usize>> + Send + 'a {
        async move {
            let mut filled = 0;
            while filled < buf.len() {
                match self.read(&mut buf[filled..]).await? {
                    0 => break,
                    n => filled += n,
                }
            }
            Ok(filled)
        }
    }
}

/// Accepts inbound peers for the relay.
pub trait Listener: Send + 'static {
    type Conn: Connection;

    /// Address actually bound, with the OS-assigned port resolved.
    fn local_addr(&self) -> String;

    /// Waits for the next inbound peer.
    ///
    /// Must be cancel safe: the relay races it against shutdown and
    /// completion events in a `select!`.
    fn accept(&mut self) -> impl Future<Output = anyhow::Result<Self::Conn>> + Send + '_;
}

/// Binds the relay's [`Listener`]. Production passes TCP, tests pass fakes.
pub trait ListenerFactory: Send + Sync + 'static {
    type L: Listener;

    /// Binds to `addr`; `"<ip>:0"` lets the OS pick the port.
    fn bind<'a>(
        &'a self,
        addr: &'a str,
    ) -> impl Future<Output = anyhow::Result<Self::L>> + Send + 'a;
}

/// Opens a sender's or receiver's connection to a relay.
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    /// Connects to the relay at `addr`.
    ///
    /// Name-resolution failures must surface as
    /// [`RelayError::Resolution`](crate::error::RelayError::Resolution)
    /// inside the returned error, so callers can tell an unknown host from
    /// a refused connection.
    fn connect<'a>(
        &'a self,
        addr: &'a str,
    ) -> impl Future<Output = anyhow::Result<Self::Conn>> + Send + 'a;
}
