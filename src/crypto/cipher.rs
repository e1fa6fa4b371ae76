//! Streaming symmetric cipher applied to each direction of a connection.
//!
//! Uses IETF ChaCha20. The keystream is consumed contiguously, so the way
//! socket reads happen to chunk the data never changes the ciphertext:
//! transforming `a` then `b` yields exactly the bytes of transforming `a ++ b`.

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{SharedSecret, KEY_SIZE, NONCE_SIZE};
use crate::error::{Error, Result};

/// Each direction key is used with exactly one nonce; keys are never shared
/// between directions.
const STREAM_NONCE: [u8; NONCE_SIZE] = [0u8; NONCE_SIZE];

/// A symmetric key for one traffic direction.
///
/// Automatically zeroized when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct StreamKey([u8; KEY_SIZE]);

impl StreamKey {
    /// Create a new stream key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    ///
    /// Handle with care - this is secret key material.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StreamKey(..)")
    }
}

/// Stateful keystream for one direction of one connection.
pub struct CipherStream {
    cipher: ChaCha20,
}

impl CipherStream {
    /// Start a fresh keystream at offset zero.
    pub fn new(key: &StreamKey) -> Self {
        Self {
            cipher: ChaCha20::new(key.as_bytes().into(), (&STREAM_NONCE).into()),
        }
    }

    /// XOR the next `buf.len()` keystream bytes into `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error once the 256 GiB keystream of a single direction is
    /// exhausted; the buffer is left untouched in that case.
    pub fn apply_in_place(&mut self, buf: &mut [u8]) -> Result<()> {
        self.cipher
            .try_apply_keystream(buf)
            .map_err(|_| Error::crypto("keystream exhausted"))
    }

    /// Encrypt a chunk, advancing the keystream by `plaintext.len()`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut out = plaintext.to_vec();
        self.apply_in_place(&mut out)?;
        Ok(out)
    }

    /// Decrypt a chunk, advancing the keystream by `ciphertext.len()`.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut out = ciphertext.to_vec();
        self.apply_in_place(&mut out)?;
        Ok(out)
    }

    /// Number of keystream bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.cipher.current_pos::<u64>()
    }
}

/// The two independent cipher states owned by one connection pair.
pub struct CipherPair {
    /// Encrypts bytes written to the relay server
    pub outbound: CipherStream,
    /// Decrypts bytes read from the relay server
    pub inbound: CipherStream,
}

impl CipherPair {
    /// Cipher states for the local (client) end of a tunnel.
    pub fn client(secret: &SharedSecret) -> Self {
        Self {
            outbound: CipherStream::new(secret.upstream_key()),
            inbound: CipherStream::new(secret.downstream_key()),
        }
    }

    /// Mirrored cipher states for the relay server end of a tunnel.
    pub fn peer(secret: &SharedSecret) -> Self {
        Self {
            outbound: CipherStream::new(secret.downstream_key()),
            inbound: CipherStream::new(secret.upstream_key()),
        }
    }
}
