//! Hub statistics
//!
//! Passive counters bumped by the handshake, codec, connection and room
//! code. Nothing here makes decisions; `snapshot()` is the only reader.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub started_at: Option<DateTime<Utc>>,
    /// Connections currently past the handshake and not yet CLOSED
    pub active_connections: u64,
    pub total_connections: u64,
    pub handshakes_rejected: u64,
    pub handshake_timeouts: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub frame_errors: u64,
    pub transport_errors: u64,
    pub application_errors: u64,
    pub broadcasts: u64,
}

impl StatsSnapshot {
    /// Total bytes moved in either direction
    pub fn total_bytes(&self) -> u64 {
        self.bytes_in + self.bytes_out
    }

    /// Format size in human-readable format
    pub fn format_size(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

/// Lock-free counters shared by every component of one hub
#[derive(Debug)]
pub struct StatsTracker {
    started_at: DateTime<Utc>,
    active_connections: AtomicU64,
    total_connections: AtomicU64,
    handshakes_rejected: AtomicU64,
    handshake_timeouts: AtomicU64,
    messages_in: AtomicU64,
    messages_out: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    frame_errors: AtomicU64,
    transport_errors: AtomicU64,
    application_errors: AtomicU64,
    broadcasts: AtomicU64,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            active_connections: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            handshakes_rejected: AtomicU64::new(0),
            handshake_timeouts: AtomicU64::new(0),
            messages_in: AtomicU64::new(0),
            messages_out: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            frame_errors: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            application_errors: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturates at zero
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn handshake_rejected(&self) {
        self.handshakes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_timed_out(&self) {
        self.handshake_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_received(&self, n: usize) {
        self.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self, n: usize) {
        self.bytes_out.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.messages_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_error(&self) {
        self.frame_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn application_error(&self) {
        self.application_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: Some(self.started_at),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            handshakes_rejected: self.handshakes_rejected.load(Ordering::Relaxed),
            handshake_timeouts: self.handshake_timeouts.load(Ordering::Relaxed),
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            application_errors: self.application_errors.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_gauge() {
        let stats = StatsTracker::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();

        let snap = stats.snapshot();
        assert_eq!(snap.active_connections, 1);
        assert_eq!(snap.total_connections, 2);
    }

    #[test]
    fn test_gauge_never_underflows() {
        let stats = StatsTracker::new();
        stats.connection_closed();
        assert_eq!(stats.snapshot().active_connections, 0);
    }

    #[test]
    fn test_traffic_counters() {
        let stats = StatsTracker::new();
        stats.bytes_received(100);
        stats.bytes_sent(50);
        stats.message_received();
        stats.frame_error();

        let snap = stats.snapshot();
        assert_eq!(snap.total_bytes(), 150);
        assert_eq!(snap.messages_in, 1);
        assert_eq!(snap.frame_errors, 1);
        assert!(snap.started_at.is_some());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(StatsSnapshot::format_size(500), "500 B");
        assert_eq!(StatsSnapshot::format_size(1536), "1.50 KB");
        assert_eq!(StatsSnapshot::format_size(1048576), "1.00 MB");
        assert_eq!(StatsSnapshot::format_size(1073741824), "1.00 GB");
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(StatsTracker::new().snapshot()).unwrap();
        assert_eq!(json["active_connections"], 0);
        assert!(json["started_at"].is_string());
    }
}
