//! Bridge metrics collection
//!
//! Counts what happens to every inbound event:
//! - Events received from relays
//! - Rejections by admission step
//! - Admitted and trusted events
//! - Delivery outcomes and handler panics
//! - Registration churn

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Bridge metrics collector
#[derive(Debug)]
pub struct BridgeMetrics {
    /// Process start time
    start_time: Instant,

    /// Events routed to a registered recipient
    pub events_received: AtomicU64,

    /// Events with a bad id or signature
    pub rejected_signature: AtomicU64,

    /// Events already admitted for the recipient
    pub rejected_duplicate: AtomicU64,

    /// Events below the minimum proof-of-work
    pub rejected_pow: AtomicU64,

    /// Events dropped because the ledger failed
    pub rejected_ledger: AtomicU64,

    /// Events admitted and handed to a handler
    pub admitted: AtomicU64,

    /// Admitted events at or above the trusted difficulty
    pub trusted: AtomicU64,

    /// Handler calls that succeeded
    pub delivered: AtomicU64,

    /// Handler calls that returned an error
    pub delivery_failures: AtomicU64,

    /// Handler calls that panicked
    pub handler_panics: AtomicU64,

    /// Successful register calls
    pub registrations: AtomicU64,

    /// Withdrawals of a registered recipient
    pub withdrawals: AtomicU64,
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            events_received: AtomicU64::new(0),
            rejected_signature: AtomicU64::new(0),
            rejected_duplicate: AtomicU64::new(0),
            rejected_pow: AtomicU64::new(0),
            rejected_ledger: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            trusted: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            handler_panics: AtomicU64::new(0),
            registrations: AtomicU64::new(0),
            withdrawals: AtomicU64::new(0),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_admitted(&self, trusted: bool) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        if trusted {
            self.trusted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn event_rejected_signature(&self) {
        self.rejected_signature.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_rejected_duplicate(&self) {
        self.rejected_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_rejected_pow(&self) {
        self.rejected_pow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_rejected_ledger(&self) {
        self.rejected_ledger.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_succeeded(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_failed(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_panicked(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn recipient_registered(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn recipient_withdrawn(&self) {
        self.withdrawals.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: chrono::Utc::now().timestamp(),
            uptime_secs: self.uptime().as_secs(),
            events_received: self.events_received.load(Ordering::Relaxed),
            rejected_signature: self.rejected_signature.load(Ordering::Relaxed),
            rejected_duplicate: self.rejected_duplicate.load(Ordering::Relaxed),
            rejected_pow: self.rejected_pow.load(Ordering::Relaxed),
            rejected_ledger: self.rejected_ledger.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            trusted: self.trusted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            withdrawals: self.withdrawals.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BridgeMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: i64,
    pub uptime_secs: u64,
    pub events_received: u64,
    pub rejected_signature: u64,
    pub rejected_duplicate: u64,
    pub rejected_pow: u64,
    pub rejected_ledger: u64,
    pub admitted: u64,
    pub trusted: u64,
    pub delivered: u64,
    pub delivery_failures: u64,
    pub handler_panics: u64,
    pub registrations: u64,
    pub withdrawals: u64,
}

impl MetricsSnapshot {
    /// Total events dropped by the admission pipeline.
    pub fn rejected(&self) -> u64 {
        self.rejected_signature + self.rejected_duplicate + self.rejected_pow + self.rejected_ledger
    }
}
