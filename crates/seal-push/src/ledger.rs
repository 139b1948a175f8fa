//! Dedup ledger: which events have already been admitted for which recipient.
//!
//! An event is committed here before its handler runs. A crash between the
//! commit and delivery loses that notification; nothing redelivers it.

use crate::error::Result;
use crate::recipient::RecipientKey;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default time admitted events are remembered.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default housekeeping interval.
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[async_trait]
pub trait DedupLedger: Send + Sync + 'static {
    async fn is_admitted(&self, event_id: &str, recipient: &RecipientKey) -> Result<bool>;

    /// Record the event as admitted. Returns false if it was already present.
    async fn mark_admitted(&self, event_id: &str, recipient: &RecipientKey) -> Result<bool>;

    /// Drop records older than `retention`. Returns how many were removed.
    async fn purge_older_than(&self, retention: Duration) -> Result<usize>;

    /// Drop every record for one recipient.
    async fn forget_recipient(&self, recipient: &RecipientKey) -> Result<usize>;
}

/// In-process ledger. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryLedger {
    admitted: Mutex<HashMap<(String, RecipientKey), i64>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record with an explicit timestamp.
    pub fn record_at(&self, event_id: &str, recipient: &RecipientKey, admitted_at: i64) {
        self.admitted
            .lock()
            .insert((event_id.to_string(), recipient.clone()), admitted_at);
    }

    pub fn len(&self) -> usize {
        self.admitted.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.lock().is_empty()
    }
}

#[async_trait]
impl DedupLedger for MemoryLedger {
    async fn is_admitted(&self, event_id: &str, recipient: &RecipientKey) -> Result<bool> {
        Ok(self
            .admitted
            .lock()
            .contains_key(&(event_id.to_string(), recipient.clone())))
    }

    async fn mark_admitted(&self, event_id: &str, recipient: &RecipientKey) -> Result<bool> {
        let mut admitted = self.admitted.lock();
        let key = (event_id.to_string(), recipient.clone());
        if admitted.contains_key(&key) {
            return Ok(false);
        }
        admitted.insert(key, chrono::Utc::now().timestamp());
        Ok(true)
    }

    async fn purge_older_than(&self, retention: Duration) -> Result<usize> {
        let cutoff = chrono::Utc::now().timestamp() - retention.as_secs() as i64;
        let mut admitted = self.admitted.lock();
        let before = admitted.len();
        admitted.retain(|_, at| *at >= cutoff);
        Ok(before - admitted.len())
    }

    async fn forget_recipient(&self, recipient: &RecipientKey) -> Result<usize> {
        let mut admitted = self.admitted.lock();
        let before = admitted.len();
        admitted.retain(|(_, key), _| key != recipient);
        Ok(before - admitted.len())
    }
}

async fn cancelled(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Periodically purge records older than `retention` until `shutdown` flips.
pub fn spawn_purge_task(
    ledger: Arc<dyn DedupLedger>,
    retention: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stop = cancelled(shutdown);
        tokio::pin!(stop);

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    match ledger.purge_older_than(retention).await {
                        Ok(0) => debug!("Ledger purge: nothing to remove"),
                        Ok(removed) => info!("Ledger purge removed {} admitted event(s)", removed),
                        Err(e) => warn!("Ledger purge failed: {}", e),
                    }
                }
            }
        }
        debug!("Ledger purge task stopped");
    })
}
