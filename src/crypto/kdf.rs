//! Key derivation from the shared password.
//!
//! Uses HKDF with SHA-256 to stretch the configured password into one
//! independent key per traffic direction.

use hkdf::Hkdf as HkdfImpl;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{StreamKey, KEY_SIZE};
use crate::error::{Error, Result};

/// HKDF salt binding derived keys to this tunnel's wire format.
const KDF_SALT: &[u8] = b"sstun-v1";

/// Info label for the client-to-server direction.
const UPSTREAM_INFO: &[u8] = b"upstream";

/// Info label for the server-to-client direction.
const DOWNSTREAM_INFO: &[u8] = b"downstream";

/// HKDF key derivation using SHA-256.
pub struct Hkdf {
    prk: HkdfImpl<Sha256>,
}

impl Hkdf {
    /// Create a new HKDF instance from input keying material.
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Self {
        Self {
            prk: HkdfImpl::new(salt, ikm),
        }
    }

    /// Expand to a fixed-size array.
    pub fn expand_fixed<const N: usize>(&self, info: &[u8]) -> Result<[u8; N]> {
        let mut okm = [0u8; N];
        self.prk
            .expand(info, &mut okm)
            .map_err(|_| Error::crypto("HKDF expansion failed"))?;
        Ok(okm)
    }

    /// Derive a stream cipher key.
    pub fn derive_stream_key(&self, info: &[u8]) -> Result<StreamKey> {
        let mut key_bytes = self.expand_fixed::<KEY_SIZE>(info)?;
        let key = StreamKey::from_bytes(key_bytes);
        key_bytes.zeroize();
        Ok(key)
    }
}

/// Process-wide key material derived from the configured password.
///
/// Read-only after startup; every connection builds its cipher states from
/// these two keys.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    upstream: StreamKey,
    downstream: StreamKey,
}

impl SharedSecret {
    /// Derive both direction keys from a password.
    pub fn from_password(password: &str) -> Result<Self> {
        if password.is_empty() {
            return Err(Error::crypto("password cannot be empty"));
        }

        let hkdf = Hkdf::new(Some(KDF_SALT), password.as_bytes());
        Ok(Self {
            upstream: hkdf.derive_stream_key(UPSTREAM_INFO)?,
            downstream: hkdf.derive_stream_key(DOWNSTREAM_INFO)?,
        })
    }

    /// Key for bytes flowing from the local client towards the relay server.
    pub fn upstream_key(&self) -> &StreamKey {
        &self.upstream
    }

    /// Key for bytes flowing from the relay server back to the local client.
    pub fn downstream_key(&self) -> &StreamKey {
        &self.downstream
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hkdf_expand_deterministic() {
        let hkdf = Hkdf::new(Some(&[0x00u8; 13]), &[0x0bu8; 22]);
        let okm: [u8; 42] = hkdf.expand_fixed(&[0xf0u8; 10]).unwrap();
        let okm2: [u8; 42] = hkdf.expand_fixed(&[0xf0u8; 10]).unwrap();
        assert_eq!(okm, okm2);
    }

    #[test]
    fn test_same_password_same_keys() {
        let a = SharedSecret::from_password("hahaha").unwrap();
        let b = SharedSecret::from_password("hahaha").unwrap();

        assert_eq!(a.upstream_key(), b.upstream_key());
        assert_eq!(a.downstream_key(), b.downstream_key());
    }

    #[test]
    fn test_directions_use_distinct_keys() {
        let secret = SharedSecret::from_password("hahaha").unwrap();
        assert_ne!(secret.upstream_key(), secret.downstream_key());
    }

    #[test]
    fn test_different_passwords_differ() {
        let a = SharedSecret::from_password("alpha").unwrap();
        let b = SharedSecret::from_password("bravo").unwrap();
        assert_ne!(a.upstream_key(), b.upstream_key());
    }

    #[test]
    fn test_empty_password_rejected() {
        assert!(SharedSecret::from_password("").is_err());
    }

    #[test]
    fn test_debug_hides_keys() {
        let secret = SharedSecret::from_password("hahaha").unwrap();
        assert_eq!(format!("{:?}", secret), "SharedSecret(..)");
    }
}
