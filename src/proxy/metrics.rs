//! Proxy metrics collection.
//!
//! Aggregate counters only; destinations and payloads are never recorded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Proxy metrics collector shared by the listener and all relays.
pub struct ProxyMetrics {
    start_time: Instant,
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    established_tunnels: AtomicU64,
    protocol_errors: AtomicU64,
    connection_errors: AtomicU64,
    /// Plaintext bytes forwarded towards the relay server
    bytes_sent: AtomicU64,
    /// Plaintext bytes delivered back to local clients
    bytes_received: AtomicU64,
}

impl ProxyMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            established_tunnels: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    /// Increment total and active connections.
    pub fn increment_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connections.
    pub fn decrement_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Count a completed handshake.
    pub fn increment_established(&self) {
        self.established_tunnels.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a connection rejected for a SOCKS5 violation.
    pub fn increment_protocol_errors(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a connection torn down by a transport failure.
    pub fn increment_connection_errors(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Add bytes to sent counter.
    pub fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add bytes to received counter.
    pub fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get total connections.
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// Get active connections.
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            total_connections: self.total_connections(),
            active_connections: self.active_connections(),
            established_tunnels: self.established_tunnels.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Format metrics as a simple text report.
    pub fn format_report(&self) -> String {
        let s = self.snapshot();

        format!(
            r#"sstun Metrics
=============
Uptime: {} seconds

Connections:
  Total:       {}
  Active:      {}
  Established: {}

Traffic:
  Sent:     {} bytes
  Received: {} bytes

Errors:
  Protocol:   {}
  Connection: {}
"#,
            s.uptime_secs,
            s.total_connections,
            s.active_connections,
            s.established_tunnels,
            s.bytes_sent,
            s.bytes_received,
            s.protocol_errors,
            s.connection_errors,
        )
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub total_connections: u64,
    pub active_connections: u64,
    pub established_tunnels: u64,
    pub protocol_errors: u64,
    pub connection_errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl MetricsSnapshot {
    /// Share of accepted connections that completed the handshake.
    pub fn success_rate(&self) -> f64 {
        if self.total_connections == 0 {
            0.0
        } else {
            self.established_tunnels as f64 / self.total_connections as f64
        }
    }
}
