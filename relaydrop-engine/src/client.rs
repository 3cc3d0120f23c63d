//! The two peer roles: stream a file into the relay, or receive one out of
//! it.

use std::path::{Path, PathBuf};

use bytes::BytesMut;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use relaydrop_core::digest::Digest;
use relaydrop_core::error::{RelayError, Result};
use relaydrop_core::filename::{announced_name, resolve_output_path, sanitize_filename};
use relaydrop_core::protocol::{
    RELAY_IDENTITY, TOKEN_LEN, encode_receiver_hello, encode_sender_hello, read_exact,
    try_decode_filename_header,
};
use relaydrop_core::transport::{Connection, Connector};

const CHUNK_SIZE: usize = 8192;

/// Summary of a completed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub filename: String,
    pub bytes: u64,
}

/// Summary of a completed receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveReport {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Connects and checks that the other end is a relay.
pub async fn connect_to_relay<K: Connector>(connector: &K, relay_addr: &str) -> Result<K::Conn> {
    let mut conn = connector
        .connect(relay_addr)
        .await
        .map_err(|e| match e.downcast::<RelayError>() {
            Ok(relay_err) => relay_err,
            Err(other) => RelayError::Connect {
                addr: relay_addr.to_string(),
                source: other.into(),
            },
        })?;

    let mut identity = [0u8; TOKEN_LEN];
    read_exact(&mut conn, &mut identity, "relay identity").await?;
    if identity != RELAY_IDENTITY {
        return Err(RelayError::protocol(format!(
            "{relay_addr} is not a relay (identity {identity:02X?})"
        )));
    }
    debug!(relay = %relay_addr, "Relay identified");
    Ok(conn)
}

/// Streams `path` to whichever receiver presents the same digest.
///
/// The file is opened before connecting so a missing file never occupies a
/// slot in the relay. Returns once the relay has closed the connection,
/// which it does after the last byte was handed to the receiver.
pub async fn send_file<K: Connector>(
    connector: &K,
    relay_addr: &str,
    digest: &Digest,
    path: &Path,
) -> Result<SendReport> {
    let filename = announced_name(path)?;
    let mut file = File::open(path)
        .await
        .map_err(|e| RelayError::io(format!("opening {}", path.display()), e))?;

    let mut hello = BytesMut::new();
    encode_sender_hello(digest, &filename, &mut hello).map_err(|e| RelayError::Usage {
        message: format!("cannot announce {}: {e}", path.display()),
    })?;

    let mut conn = connect_to_relay(connector, relay_addr).await?;
    Connection::write_all(&mut conn, &hello)
        .await
        .map_err(|e| RelayError::io("sending handshake", e))?;
    info!(relay = %relay_addr, file = %path.display(), "Waiting for a receiver");

    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut bytes = 0u64;
    loop {
        let n = file
            .read(&mut chunk)
            .await
            .map_err(|e| RelayError::io(format!("reading {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        Connection::write_all(&mut conn, &chunk[..n])
            .await
            .map_err(|e| RelayError::io("sending payload", e))?;
        bytes += n as u64;
    }
    Connection::shutdown(&mut conn)
        .await
        .map_err(|e| RelayError::io("closing upload", e))?;

    // Anything the relay sends now is noise; only EOF matters.
    loop {
        let n = Connection::read(&mut conn, &mut chunk)
            .await
            .map_err(|e| RelayError::io("waiting for the relay to finish", e))?;
        if n == 0 {
            break;
        }
    }

    info!(bytes, "File sent");
    Ok(SendReport {
        filename: sanitize_filename(&filename),
        bytes,
    })
}

/// Receives the file a sender registered under `digest`.
///
/// `output` is either a directory (the announced name is appended after
/// sanitising) or the exact file to write. Nothing is created on disk until
/// the filename header has arrived; a relay that closes before sending any
/// byte of it means no sender was waiting.
pub async fn receive_file<K: Connector>(
    connector: &K,
    relay_addr: &str,
    digest: &Digest,
    output: &Path,
) -> Result<ReceiveReport> {
    let mut conn = connect_to_relay(connector, relay_addr).await?;

    let mut hello = BytesMut::new();
    encode_receiver_hello(digest, &mut hello);
    Connection::write_all(&mut conn, &hello)
        .await
        .map_err(|e| RelayError::io("sending handshake", e))?;

    let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let raw_name = loop {
        if let Some(name) =
            try_decode_filename_header(&mut buf).map_err(|e| RelayError::protocol(e.to_string()))?
        {
            break name;
        }
        let n = Connection::read(&mut conn, &mut chunk)
            .await
            .map_err(|e| RelayError::io("reading filename header", e))?;
        if n == 0 {
            return Err(if buf.is_empty() {
                RelayError::NoPeer
            } else {
                RelayError::protocol("connection closed inside the filename header")
            });
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let path = resolve_output_path(output, &raw_name);
    info!(file = %path.display(), "Receiving");
    let mut file = File::create(&path)
        .await
        .map_err(|e| RelayError::io(format!("creating {}", path.display()), e))?;

    // Payload bytes that arrived in the same read as the header.
    let mut bytes = buf.len() as u64;
    file.write_all(&buf)
        .await
        .map_err(|e| RelayError::io(format!("writing {}", path.display()), e))?;

    loop {
        let n = Connection::read(&mut conn, &mut chunk)
            .await
            .map_err(|e| RelayError::io("reading payload", e))?;
        if n == 0 {
            break;
        }
        file.write_all(&chunk[..n])
            .await
            .map_err(|e| RelayError::io(format!("writing {}", path.display()), e))?;
        bytes += n as u64;
    }
    file.flush()
        .await
        .map_err(|e| RelayError::io(format!("flushing {}", path.display()), e))?;

    info!(bytes, file = %path.display(), "File received");
    Ok(ReceiveReport { path, bytes })
}
