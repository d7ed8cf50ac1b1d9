//! Observability and Metrics
//!
//! Counters for one network service and everything layered on it (sessions,
//! dispatch, actor calls). Each service owns its own `Arc<Metrics>`, so two
//! services in one process report independently.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one network service
#[derive(Debug)]
pub struct Metrics {
    /// Channels created by the listener
    pub connections_accepted: AtomicU64,
    /// Channels created by dialing out
    pub connections_connected: AtomicU64,
    /// Currently registered channels
    pub connections_active: AtomicU64,
    /// Failed accept calls (the listener keeps running)
    pub accept_failures: AtomicU64,
    /// Total packets queued for sending
    pub packets_sent: AtomicU64,
    /// Total packets decoded
    pub packets_received: AtomicU64,
    /// Total bytes written to sockets
    pub bytes_sent: AtomicU64,
    /// Total bytes read from sockets
    pub bytes_received: AtomicU64,
    /// Connections dropped for malformed framing
    pub framing_errors: AtomicU64,
    /// Channels closed by socket errors or disconnects
    pub channel_errors: AtomicU64,
    /// Calls issued through sessions or the actor sender
    pub rpc_calls: AtomicU64,
    /// Calls resolved by the timeout sweep
    pub rpc_timeouts: AtomicU64,
    /// Calls resolved by cancellation
    pub rpc_cancellations: AtomicU64,
    /// Handler invocations that failed or panicked
    pub handler_failures: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_accepted: AtomicU64::new(0),
            connections_connected: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            accept_failures: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            framing_errors: AtomicU64::new(0),
            channel_errors: AtomicU64::new(0),
            rpc_calls: AtomicU64::new(0),
            rpc_timeouts: AtomicU64::new(0),
            rpc_cancellations: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a channel created by the listener
    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a channel created by dialing out
    pub fn connection_connected(&self) {
        self.connections_connected.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a channel removed from the service
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a failed accept
    pub fn accept_failed(&self) {
        self.accept_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a packet queued for sending
    pub fn packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a decoded packet
    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes written to a socket
    pub fn bytes_written(&self, byte_count: u64) {
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record bytes read from a socket
    pub fn bytes_read(&self, byte_count: u64) {
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a connection dropped for malformed framing
    pub fn framing_error(&self) {
        self.framing_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a channel closed by an error
    pub fn channel_error(&self) {
        self.channel_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an issued call
    pub fn rpc_call(&self) {
        self.rpc_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call resolved by timeout
    pub fn rpc_timeout(&self) {
        self.rpc_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call resolved by cancellation
    pub fn rpc_cancelled(&self) {
        self.rpc_cancellations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed handler invocation
    pub fn handler_failed(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_connected: self.connections_connected.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            accept_failures: self.accept_failures.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            channel_errors: self.channel_errors.load(Ordering::Relaxed),
            rpc_calls: self.rpc_calls.load(Ordering::Relaxed),
            rpc_timeouts: self.rpc_timeouts.load(Ordering::Relaxed),
            rpc_cancellations: self.rpc_cancellations.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_accepted = snapshot.connections_accepted,
            connections_connected = snapshot.connections_connected,
            connections_active = snapshot.connections_active,
            accept_failures = snapshot.accept_failures,
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            framing_errors = snapshot.framing_errors,
            channel_errors = snapshot.channel_errors,
            rpc_calls = snapshot.rpc_calls,
            rpc_timeouts = snapshot.rpc_timeouts,
            rpc_cancellations = snapshot.rpc_cancellations,
            handler_failures = snapshot.handler_failures,
            uptime_seconds = snapshot.uptime_seconds,
            "Network metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_connected: u64,
    pub connections_active: u64,
    pub accept_failures: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub framing_errors: u64,
    pub channel_errors: u64,
    pub rpc_calls: u64,
    pub rpc_timeouts: u64,
    pub rpc_cancellations: u64,
    pub handler_failures: u64,
    pub uptime_seconds: u64,
}
