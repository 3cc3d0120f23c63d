use std::fmt;

use sha1::{Digest as _, Sha1};

/// Length of a digest on the wire: a SHA-1 hash, hex-encoded.
pub const DIGEST_LEN: usize = 40;

/// The pairing key a sender and receiver present to the relay.
///
/// On the relay side a digest is an opaque 40-byte token: it is never parsed,
/// only hashed and compared over its full length. Clients derive it from the
/// shared secret with [`Digest::from_secret`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Hashes a human-readable secret into its lowercase hex SHA-1 digest.
    #[must_use]
    pub fn from_secret(secret: &str) -> Self {
        let hash = Sha1::digest(secret.as_bytes());
        let mut out = [0u8; DIGEST_LEN];
        // 20 hash bytes always encode to exactly DIGEST_LEN hex characters.
        hex::encode_to_slice(hash, &mut out).expect("SHA-1 output is 20 bytes");
        Self(out)
    }

    /// Wraps raw digest bytes read off the wire.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Short printable prefix for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        String::from_utf8_lossy(&self.0[..8]).into_owned()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}
