//! Service façade tying storage, the registry and delivery together.

use crate::config::BridgeConfig;
use crate::delivery::{Notifier, NotifyHandler, TopicRateLimiter};
use crate::error::{BridgeError, Result};
use crate::ledger::DedupLedger;
use crate::metrics::{BridgeMetrics, MetricsSnapshot};
use crate::recipient::RecipientKey;
use crate::registry::{FilterTemplate, Registration, RegistryConfig, SubscriptionRegistry};
use crate::store::{RecipientRecord, RecipientStore};
use nostr_client::{Connector, LinkStats};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Status report for operators.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub recipients: usize,
    pub relays: usize,
    pub links: Vec<LinkStats>,
    pub metrics: MetricsSnapshot,
}

pub struct Bridge {
    config: BridgeConfig,
    store: Arc<dyn RecipientStore>,
    ledger: Arc<dyn DedupLedger>,
    registry: SubscriptionRegistry,
    notifier: Arc<dyn Notifier>,
    limiter: Arc<TopicRateLimiter>,
    metrics: Arc<BridgeMetrics>,
    template: FilterTemplate,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        store: Arc<dyn RecipientStore>,
        ledger: Arc<dyn DedupLedger>,
        connector: Arc<dyn Connector>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let metrics = Arc::new(BridgeMetrics::new());
        let registry = SubscriptionRegistry::new(
            connector,
            Arc::clone(&ledger),
            RegistryConfig {
                link: config.link_config(),
                pow: config.pow_policy(),
            },
            Arc::clone(&metrics),
        );
        let limiter = Arc::new(TopicRateLimiter::new(
            config.delivery.rate_limit,
            Duration::from_secs(config.delivery.rate_window_secs),
        ));

        Self {
            config,
            store,
            ledger,
            registry,
            notifier,
            limiter,
            metrics,
            template: FilterTemplate::default(),
        }
    }

    /// Start (or replace) the watch for `recipient`, persisting it first.
    ///
    /// An empty relay list falls back to the configured default relays.
    pub async fn subscribe(
        &self,
        recipient: &str,
        relays: &[String],
        delivery_target: &str,
    ) -> Result<Registration> {
        let key = RecipientKey::parse(recipient)?;
        let delivery_target = delivery_target.trim();
        if delivery_target.is_empty() {
            return Err(BridgeError::Delivery("delivery target is empty".to_string()));
        }

        let relays = if relays.is_empty() {
            self.config.relays.defaults.clone()
        } else {
            relays.to_vec()
        };

        let record = RecipientRecord {
            recipient: key.to_string(),
            relays,
            delivery_target: delivery_target.to_string(),
        };
        self.store.upsert(&record).await?;
        self.register_record(&record).await
    }

    /// Stop watching `recipient` and forget everything stored about it.
    ///
    /// Returns false if the recipient was neither stored nor registered.
    pub async fn unsubscribe(&self, recipient: &str) -> Result<bool> {
        let key = RecipientKey::parse(recipient)?;
        let removed = self.store.remove(&key).await?;
        let withdrawn = self.registry.withdraw(&key).await;
        let forgotten = self.ledger.forget_recipient(&key).await?;
        info!(
            "Unsubscribed {} ({} ledger record(s) dropped)",
            key.short(),
            forgotten
        );
        Ok(removed || withdrawn)
    }

    /// Register every stored recipient. A record that fails is logged and
    /// skipped. Returns how many were registered.
    pub async fn restore(&self) -> Result<usize> {
        let records = self.store.list_all().await?;
        let mut restored = 0;
        for record in &records {
            match self.register_record(record).await {
                Ok(_) => restored += 1,
                Err(e) => warn!("Skipping stored recipient {}: {}", record.recipient, e),
            }
        }
        info!("Restored {}/{} recipient(s)", restored, records.len());
        Ok(restored)
    }

    async fn register_record(&self, record: &RecipientRecord) -> Result<Registration> {
        let handler = Arc::new(NotifyHandler::new(
            Arc::clone(&self.notifier),
            record.delivery_target.clone(),
            Arc::clone(&self.limiter),
        ));
        self.registry
            .register(&record.recipient, &record.relays, &self.template, handler)
            .await
    }

    pub async fn stats(&self) -> BridgeStats {
        let links = self.registry.link_stats().await;
        BridgeStats {
            recipients: self.registry.recipient_count().await,
            relays: links.len(),
            links,
            metrics: self.metrics.snapshot(),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Close every relay link within `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.registry.shutdown(grace).await;
    }
}
