use anyhow::{Result, bail, ensure};
use bytes::{Buf, BufMut, BytesMut};

use crate::digest::{DIGEST_LEN, Digest};
use crate::error::RelayError;
use crate::transport::Connection;

/// Token the relay sends first on every accepted connection.
pub const RELAY_IDENTITY: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];
/// Role token announcing a sender.
pub const SENDER_TOKEN: [u8; 4] = [0xAD, 0xEA, 0xFB, 0xEE];
/// Role token announcing a receiver.
pub const RECEIVER_TOKEN: [u8; 4] = [0xFA, 0xCA, 0xDE, 0xED];

/// Size of every fixed token on the wire.
pub const TOKEN_LEN: usize = 4;
/// Size of the big-endian filename length prefix.
const LENGTH_PREFIX_LEN: usize = 2;
/// Upper bound on an announced filename, the longest path any common
/// filesystem accepts.
pub const MAX_FILENAME_LEN: usize = 4096;

/// Which side of a transfer a peer claims to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    #[must_use]
    pub const fn token(self) -> [u8; TOKEN_LEN] {
        match self {
            Self::Sender => SENDER_TOKEN,
            Self::Receiver => RECEIVER_TOKEN,
        }
    }
}

impl TryFrom<[u8; TOKEN_LEN]> for Role {
    type Error = anyhow::Error;

    fn try_from(value: [u8; TOKEN_LEN]) -> Result<Self> {
        match value {
            SENDER_TOKEN => Ok(Self::Sender),
            RECEIVER_TOKEN => Ok(Self::Receiver),
            other => bail!("unknown role token: {}", hex_token(other)),
        }
    }
}

fn hex_token(token: [u8; TOKEN_LEN]) -> String {
    token.iter().map(|b| format!("{b:02X}")).collect()
}

// ── Peer hello (peer → relay) ───────────────────────────────────────

/// What a peer announces after the relay identifies itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub role: Role,
    pub digest: Digest,
    /// Raw filename bytes. Present for senders only.
    pub filename: Option<Vec<u8>>,
}

/// Encodes the sender side of the handshake: role, digest, filename frame.
pub fn encode_sender_hello(digest: &Digest, filename: &[u8], buf: &mut BytesMut) -> Result<()> {
    buf.reserve(TOKEN_LEN + DIGEST_LEN + LENGTH_PREFIX_LEN + filename.len());
    buf.put_slice(&SENDER_TOKEN);
    buf.put_slice(digest.as_bytes());
    encode_filename_header(filename, buf)
}

/// Encodes the receiver side of the handshake: role and digest only.
pub fn encode_receiver_hello(digest: &Digest, buf: &mut BytesMut) {
    buf.reserve(TOKEN_LEN + DIGEST_LEN);
    buf.put_slice(&RECEIVER_TOKEN);
    buf.put_slice(digest.as_bytes());
}

/// Reads a complete peer hello from `conn`.
///
/// Every short read, unknown role token or out-of-range filename length is a
/// [`RelayError::Protocol`]; the caller is expected to drop the connection.
pub async fn read_hello<C: Connection>(conn: &mut C) -> crate::error::Result<Hello> {
    let mut token = [0u8; TOKEN_LEN];
    read_exact(conn, &mut token, "role token").await?;
    let role = Role::try_from(token).map_err(|e| RelayError::protocol(e.to_string()))?;

    let mut digest = [0u8; DIGEST_LEN];
    read_exact(conn, &mut digest, "digest").await?;
    let digest = Digest::from_bytes(digest);

    let filename = match role {
        Role::Sender => Some(read_filename(conn).await?),
        Role::Receiver => None,
    };

    Ok(Hello {
        role,
        digest,
        filename,
    })
}

/// Reads the 2-byte length prefix and the filename bytes that follow it.
pub async fn read_filename<C: Connection>(conn: &mut C) -> crate::error::Result<Vec<u8>> {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    read_exact(conn, &mut prefix, "filename length").await?;
    let len = usize::from(u16::from_be_bytes(prefix));
    check_filename_len(len).map_err(|e| RelayError::protocol(e.to_string()))?;

    let mut name = vec![0u8; len];
    read_exact(conn, &mut name, "filename").await?;
    Ok(name)
}

/// Fills `buf` completely or fails with a protocol error naming `what`.
pub async fn read_exact<C: Connection>(
    conn: &mut C,
    buf: &mut [u8],
    what: &str,
) -> crate::error::Result<()> {
    let filled = conn
        .fill(buf)
        .await
        .map_err(|e| RelayError::protocol(format!("failed to read {what}: {e:#}")))?;
    if filled < buf.len() {
        return Err(RelayError::protocol(format!(
            "short read on {what}: got {filled} of {} bytes",
            buf.len()
        )));
    }
    Ok(())
}

// ── Filename header (relay → receiver) ──────────────────────────────

fn check_filename_len(len: usize) -> Result<()> {
    ensure!(len > 0, "empty filename");
    ensure!(
        len <= MAX_FILENAME_LEN,
        "filename too long: {len} bytes (max {MAX_FILENAME_LEN})"
    );
    Ok(())
}

/// Appends the filename frame (2-byte big-endian length + bytes) to `buf`.
///
/// # Errors
///
/// Fails when the name is empty or longer than [`MAX_FILENAME_LEN`].
pub fn encode_filename_header(filename: &[u8], buf: &mut BytesMut) -> Result<()> {
    check_filename_len(filename.len())?;
    buf.reserve(LENGTH_PREFIX_LEN + filename.len());
    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_FILENAME_LEN
    buf.put_u16(filename.len() as u16);
    buf.put_slice(filename);
    Ok(())
}

/// Convenience wrapper that allocates and returns the encoded header.
pub fn encode_filename_header_to_bytes(filename: &[u8]) -> Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + filename.len());
    encode_filename_header(filename, &mut buf)?;
    Ok(buf)
}

/// Attempts to decode one filename frame from the front of `buf`.
///
/// * `Ok(Some(name))`: the full frame was present and has been consumed.
///   Any bytes after it (payload) stay in `buf`.
/// * `Ok(None)`: not enough bytes yet; `buf` is left untouched.
/// * `Err(..)`: the declared length is zero or above [`MAX_FILENAME_LEN`].
pub fn try_decode_filename_header(buf: &mut BytesMut) -> Result<Option<Vec<u8>>> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return Ok(None);
    }

    let len = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
    check_filename_len(len)?;

    if buf.len() < LENGTH_PREFIX_LEN + len {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_LEN);
    Ok(Some(buf.split_to(len).to_vec()))
}
