// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared by the ingest side, the queue and the delivery engine.
#[derive(Debug)]
pub struct PipelineStats {
    /// Records framed out of the input.
    pub records_framed: AtomicU64,

    /// Records dropped before becoming a payload (unrecognized, malformed,
    /// oversized, unterminated).
    pub records_dropped: AtomicU64,

    /// Payloads handed to the queue.
    pub documents_enqueued: AtomicU64,

    /// Payloads acknowledged by the transport.
    pub published: AtomicU64,

    /// Bytes acknowledged by the transport.
    pub bytes_published: AtomicU64,

    /// Failed publish attempts (including timeouts).
    pub publish_failures: AtomicU64,

    /// Payloads dropped after exhausting their attempts.
    pub expired: AtomicU64,

    /// Reconnects after a lost connection.
    pub reconnects: AtomicU64,

    /// Payloads released unpublished at shutdown.
    pub discarded: AtomicU64,

    /// Creation time.
    pub created: Instant,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            records_framed: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            documents_enqueued: AtomicU64::new(0),
            published: AtomicU64::new(0),
            bytes_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub fn record_framed(&self) {
        self.records_framed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.documents_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an acknowledged publish of `bytes` bytes.
    pub fn record_published(&self, bytes: u64) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            records_framed: self.records_framed.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            documents_enqueued: self.documents_enqueued.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

/// Snapshot of pipeline statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    pub records_framed: u64,
    pub records_dropped: u64,
    pub documents_enqueued: u64,
    pub published: u64,
    pub bytes_published: u64,
    pub publish_failures: u64,
    pub expired: u64,
    pub reconnects: u64,
    pub discarded: u64,
    pub uptime_secs: u64,
}

impl PipelineStatsSnapshot {
    /// Calculate messages published per second.
    pub fn messages_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.published as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }

    /// Calculate bytes published per second.
    pub fn bytes_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.bytes_published as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = PipelineStats::new();
        stats.record_framed();
        stats.record_framed();
        stats.record_dropped();
        stats.record_published(100);
        stats.record_published(50);
        stats.record_failure();
        stats.record_expired();

        let snap = stats.snapshot();
        assert_eq!(snap.records_framed, 2);
        assert_eq!(snap.records_dropped, 1);
        assert_eq!(snap.published, 2);
        assert_eq!(snap.bytes_published, 150);
        assert_eq!(snap.publish_failures, 1);
        assert_eq!(snap.expired, 1);
        assert_eq!(snap.discarded, 0);
    }

    #[test]
    fn test_rates() {
        let snap = PipelineStatsSnapshot {
            published: 100,
            bytes_published: 1000,
            uptime_secs: 10,
            ..Default::default()
        };
        assert!((snap.messages_per_second() - 10.0).abs() < 0.01);
        assert!((snap.bytes_per_second() - 100.0).abs() < 0.01);
        assert_eq!(PipelineStatsSnapshot::default().messages_per_second(), 0.0);
    }
}
