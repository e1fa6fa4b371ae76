//! # sstun
//!
//! Local half of a minimal encrypted tunnel. Applications speak SOCKS5 to a
//! local listener; every CONNECT is carried to a preconfigured relay server
//! over a ChaCha20 stream keyed from a shared password.
//!
//! ## Architecture Overview
//!
//! ```text
//! application ──SOCKS5──▶ Listener ─▶ Negotiator ─▶ Relay ──encrypted──▶ relay server
//! ```
//!
//! ## Wire Format (relay side)
//!
//! ```text
//! E(ATYP | [len] | address) E(port, 2 bytes BE) E(payload ...)
//! ```
//!
//! One keystream per direction per connection; no framing.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod proxy;
pub mod shutdown;

pub use config::ClientConfig;
pub use error::{Error, ProtocolError, Result};
pub use proxy::Listener;
pub use shutdown::Shutdown;

/// Upper bound on a single relay read, per direction.
pub const RELAY_BUFFER_SIZE: usize = 16 * 1024;
