//! Error types for the tunnel client.

use thiserror::Error;

/// Result type alias for tunnel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving a local connection.
#[derive(Error, Debug)]
pub enum Error {
    /// The local client violated the SOCKS5 subset we speak
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Read or write failure on either socket of a connection pair
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Dialing the relay server failed
    #[error("failed to connect to relay server {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Dialing the relay server did not finish in time
    #[error("connection to relay server {addr} timed out after {millis}ms")]
    ConnectTimeout { addr: String, millis: u64 },

    /// The local listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Cryptographic operation failed
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The relay already reached its terminal state
    #[error("relay is closed")]
    RelayClosed,
}

impl Error {
    /// Create a new cryptographic error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// The local client sent something we refuse to handle.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Transport failure confined to a single connection pair.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Connect { .. } | Error::ConnectTimeout { .. }
        )
    }

    /// Failure that prevents the listener from starting.
    pub fn is_startup(&self) -> bool {
        matches!(self, Error::Bind { .. } | Error::Config(_))
    }
}

/// SOCKS5 negotiation failures caused by the local client.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// VER byte was not 5
    #[error("unsupported SOCKS version {0}")]
    UnsupportedVersion(u8),

    /// CMD other than CONNECT
    #[error("unsupported SOCKS command 0x{0:02x}")]
    UnsupportedCommand(u8),

    /// Unknown or disabled ATYP
    #[error("unsupported address type 0x{0:02x}")]
    UnsupportedAddressType(u8),
}

impl ProtocolError {
    /// SOCKS5 `REP` code to report before aborting, if the protocol has one.
    ///
    /// A version mismatch means the peer is not speaking SOCKS5 at all, so
    /// nothing is written back.
    pub fn reply_code(&self) -> Option<u8> {
        match self {
            ProtocolError::UnsupportedVersion(_) => None,
            ProtocolError::UnsupportedCommand(_) => Some(0x07),
            ProtocolError::UnsupportedAddressType(_) => Some(0x08),
        }
    }
}
