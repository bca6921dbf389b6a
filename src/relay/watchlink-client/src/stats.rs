//! Relay activity counters
//!
//! In-process counters only; there is no exporter. Snapshots are cheap and
//! safe to take from any thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of relay activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Requests written to a live connection
    pub requests_sent: u64,
    /// Requests parked in the outbound queue while disconnected
    pub requests_queued: u64,
    /// Queued create-requests cancelled by a close before ever being sent
    pub creates_cancelled: u64,
    /// Inbound notifications that resolved to a registered watch id
    pub notifications_dispatched: u64,
    /// Inbound notifications dropped because their id is no longer registered
    pub unknown_notifications: u64,
    /// Currently open remote watches (distinct kind + path pairs)
    pub active_watches: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    requests_sent: AtomicU64,
    requests_queued: AtomicU64,
    creates_cancelled: AtomicU64,
    notifications_dispatched: AtomicU64,
    unknown_notifications: AtomicU64,
}

impl StatsCollector {
    pub(crate) fn record_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queued(&self) {
        self.requests_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.creates_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.notifications_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unknown(&self) {
        self.unknown_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, active_watches: usize) -> RelayStats {
        RelayStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            requests_queued: self.requests_queued.load(Ordering::Relaxed),
            creates_cancelled: self.creates_cancelled.load(Ordering::Relaxed),
            notifications_dispatched: self.notifications_dispatched.load(Ordering::Relaxed),
            unknown_notifications: self.unknown_notifications.load(Ordering::Relaxed),
            active_watches,
        }
    }
}
