//! Encrypted duplex relay between a local client and the relay server.
//!
//! One task owns both sockets and waits on whichever becomes readable
//! first. Bytes read locally are encrypted and written to the relay server;
//! bytes read from the relay server are decrypted and written locally.
//! EOF or an I/O error on either side closes both.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::CipherPair;
use crate::error::{Error, Result};
use crate::proxy::metrics::ProxyMetrics;
use crate::shutdown::Shutdown;
use crate::RELAY_BUFFER_SIZE;

/// A local/remote socket pair and the cipher states that belong to it.
///
/// The three are created together after a handshake and dropped together
/// when the relay closes.
pub struct ConnectionPair<L, R> {
    /// Connection from the local application
    pub local: L,
    /// Connection to the relay server
    pub remote: R,
    /// Per-direction keystreams for this pair
    pub cipher: CipherPair,
}

impl<L, R> ConnectionPair<L, R> {
    /// Bundle an established pair.
    pub fn new(local: L, remote: R, cipher: CipherPair) -> Self {
        Self {
            local,
            remote,
            cipher,
        }
    }
}

/// Relay lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Created, not yet running
    Idle,
    /// Forwarding traffic
    Multiplexing,
    /// Terminal; both connections have been released
    Closed,
}

/// Why a relay stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The local application closed its side
    LocalEof,
    /// The relay server closed its side
    RemoteEof,
    /// Process shutdown was observed between iterations
    Shutdown,
}

/// Traffic totals for a relay that closed cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Plaintext bytes forwarded to the relay server
    pub bytes_outbound: u64,
    /// Plaintext bytes delivered to the local application
    pub bytes_inbound: u64,
    /// What ended the relay
    pub closed_by: CloseReason,
}

enum Event {
    Outbound(io::Result<usize>),
    Inbound(io::Result<usize>),
}

/// Duplex forwarding loop for one connection pair.
pub struct Relay<L, R> {
    pair: Option<ConnectionPair<L, R>>,
    state: RelayState,
    shutdown: Shutdown,
    metrics: Option<Arc<ProxyMetrics>>,
}

impl<L, R> Relay<L, R>
where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    /// Create an idle relay that takes ownership of `pair`.
    pub fn new(pair: ConnectionPair<L, R>, shutdown: Shutdown) -> Self {
        Self {
            pair: Some(pair),
            state: RelayState::Idle,
            shutdown,
            metrics: None,
        }
    }

    /// Report forwarded byte counts into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<ProxyMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Forward traffic until EOF, error, or shutdown, then close both sides.
    ///
    /// A relay runs at most once; calling this again returns
    /// [`Error::RelayClosed`].
    pub async fn run(&mut self) -> Result<RelayStats> {
        let mut pair = self.pair.take().ok_or(Error::RelayClosed)?;
        self.state = RelayState::Multiplexing;
        tracing::trace!("relay state: Idle -> Multiplexing");

        let mut totals = (0u64, 0u64);
        let result = self.multiplex(&mut pair, &mut totals).await;

        let _ = pair.local.shutdown().await;
        let _ = pair.remote.shutdown().await;
        drop(pair);
        self.state = RelayState::Closed;
        tracing::trace!("relay state: Multiplexing -> Closed");

        let closed_by = result?;
        Ok(RelayStats {
            bytes_outbound: totals.0,
            bytes_inbound: totals.1,
            closed_by,
        })
    }

    async fn multiplex(
        &self,
        pair: &mut ConnectionPair<L, R>,
        totals: &mut (u64, u64),
    ) -> Result<CloseReason> {
        let mut up = vec![0u8; RELAY_BUFFER_SIZE];
        let mut down = vec![0u8; RELAY_BUFFER_SIZE];

        loop {
            if !self.shutdown.is_running() {
                return Ok(CloseReason::Shutdown);
            }

            // Both reads are cancel safe: the losing branch consumed nothing.
            let event = tokio::select! {
                r = pair.local.read(&mut up) => Event::Outbound(r),
                r = pair.remote.read(&mut down) => Event::Inbound(r),
            };

            match event {
                Event::Outbound(read) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(CloseReason::LocalEof);
                    }
                    let chunk = &mut up[..n];
                    pair.cipher.outbound.apply_in_place(chunk)?;
                    pair.remote.write_all(chunk).await?;

                    totals.0 += n as u64;
                    if let Some(metrics) = &self.metrics {
                        metrics.add_bytes_sent(n as u64);
                    }
                }
                Event::Inbound(read) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(CloseReason::RemoteEof);
                    }
                    let chunk = &mut down[..n];
                    pair.cipher.inbound.apply_in_place(chunk)?;
                    pair.local.write_all(chunk).await?;

                    totals.1 += n as u64;
                    if let Some(metrics) = &self.metrics {
                        metrics.add_bytes_received(n as u64);
                    }
                }
            }
        }
    }
}
