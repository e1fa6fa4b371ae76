//! SOCKS5 front-end and encrypted relay.
//!
//! Control flow per connection:
//! [`Listener`] accepts → [`Negotiator`] runs the handshake and dials the
//! relay server → [`Relay`] forwards until either side closes.

pub mod address;
pub mod listener;
pub mod metrics;
pub mod relay;
pub mod socks5;

pub use address::{Address, AddressType, Destination};
pub use listener::Listener;
pub use metrics::{MetricsSnapshot, ProxyMetrics};
pub use relay::{CloseReason, ConnectionPair, Relay, RelayState, RelayStats};
pub use socks5::{Negotiated, Negotiator, Reply};
