//! Cryptographic primitives for the tunnel.
//!
//! This module provides:
//! - HKDF-SHA256 derivation of per-direction keys from the shared password
//! - ChaCha20 stream cipher states that stay contiguous across I/O chunks
//!
//! All secret material is zeroized on drop to prevent memory leakage.

mod cipher;
mod kdf;

pub use cipher::{CipherPair, CipherStream, StreamKey};
pub use kdf::{Hkdf, SharedSecret};

/// Size of symmetric keys in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the ChaCha20 nonce in bytes (96 bits, IETF variant)
pub const NONCE_SIZE: usize = 12;
