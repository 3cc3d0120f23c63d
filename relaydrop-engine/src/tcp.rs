use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net;
use tracing::{debug, info, warn};

use relaydrop_core::error::RelayError;
use relaydrop_core::transport::{Connection, Connector, Listener, ListenerFactory};

/// One relay peer over TCP.
///
/// Nagle is turned off: the handshake is a few small writes that each side
/// waits on, and the relay forwards payload chunks as they arrive.
pub struct TcpConnection {
    stream: net::TcpStream,
    peer_addr: String,
}

impl TcpConnection {
    fn new(stream: net::TcpStream, peer_addr: String) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }
        Self { stream, peer_addr }
    }

    pub fn stream(&self) -> &net::TcpStream {
        &self.stream
    }
}

impl Connection for TcpConnection {
    fn peer(&self) -> String {
        self.peer_addr.clone()
    }

    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = anyhow::Result<usize>> + Send + 'a {
        async move {
            self.stream
                .read(buf)
                .await
                .context("failed to read from TCP connection")
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
                .context("failed to write to TCP connection")
        }
    }

    fn shutdown(&mut self) -> impl Future<Output = anyhow::Result<()>> + Send + '_ {
        async move {
            self.stream
                .shutdown()
                .await
                .context("failed to shut down TCP connection")
        }
    }
}

/// The relay's inbound side.
pub struct TcpListener {
    inner: net::TcpListener,
    local_addr: String,
}

impl Listener for TcpListener {
    type Conn = TcpConnection;

    fn local_addr(&self) -> String {
        self.local_addr.clone()
    }

    fn accept(&mut self) -> impl Future<Output = anyhow::Result<Self::Conn>> + Send + '_ {
        async move {
            let (stream, addr) = self
                .inner
                .accept()
                .await
                .context("failed to accept TCP connection")?;
            let peer_addr = addr.to_string();
            debug!(peer = %peer_addr, "Peer connected");
            Ok(TcpConnection::new(stream, peer_addr))
        }
    }
}

/// Binds the relay's listening socket.
pub struct TcpListenerFactory;

impl ListenerFactory for TcpListenerFactory {
    type L = TcpListener;

    fn bind<'a>(
        &'a self,
        addr: &'a str,
    ) -> impl Future<Output = anyhow::Result<Self::L>> + Send + 'a {
        async move {
            let inner = net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind TCP listener on {addr}"))?;
            let local_addr = inner
                .local_addr()
                .context("failed to retrieve local address")?
                .to_string();
            info!(addr = %local_addr, "Relay socket bound");
            Ok(TcpListener { inner, local_addr })
        }
    }
}

/// Opens outbound TCP connections to a relay.
///
/// Resolution happens before connecting so an unknown host surfaces as
/// [`RelayError::Resolution`] rather than a generic connect failure.
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Conn = TcpConnection;

    fn connect<'a>(
        &'a self,
        addr: &'a str,
    ) -> impl Future<Output = anyhow::Result<Self::Conn>> + Send + 'a {
        async move {
            let candidates: Vec<_> = net::lookup_host(addr)
                .await
                .map_err(|source| RelayError::Resolution {
                    addr: addr.to_string(),
                    source,
                })?
                .collect();

            let mut last_err = None;
            for candidate in candidates {
                match net::TcpStream::connect(candidate).await {
                    Ok(stream) => {
                        debug!(addr = %candidate, "Connected to relay");
                        return Ok(TcpConnection::new(stream, candidate.to_string()));
                    }
                    Err(e) => last_err = Some(e),
                }
            }

            match last_err {
                Some(e) => Err(e).with_context(|| format!("failed to connect to {addr}")),
                None => Err(RelayError::Resolution {
                    addr: addr.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no addresses returned",
                    ),
                }
                .into()),
            }
        }
    }
}
