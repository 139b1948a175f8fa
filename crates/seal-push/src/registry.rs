//! Subscription registry.
//!
//! Maps each recipient to one watch per relay over the shared
//! [`ConnectionPool`], and routes inbound events back to the recipient's
//! handler through the admission pipeline.
//!
//! Lock order: `recipients` (tokio mutex, serializes register/withdraw), then
//! the pool map, then a link's watch map. The route table is a leaf lock and
//! is never held across an await.

use crate::admission::{AdmissionPipeline, AdmittedEvent, PowPolicy, Rejection};
use crate::error::{BridgeError, Result};
use crate::ledger::DedupLedger;
use crate::metrics::BridgeMetrics;
use crate::recipient::RecipientKey;
use async_trait::async_trait;
use futures::FutureExt;
use nostr::{Event, KIND_GIFT_WRAP};
use nostr_client::{
    ClientError, Connector, ConnectionPool, Filter, LinkConfig, LinkStats, RelaySink, RelayUrl,
};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Receives admitted events for one recipient.
///
/// Runs on its own task; a slow or failing handler never blocks a relay link.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: AdmittedEvent) -> Result<()>;
}

/// Shape of the filter issued for every recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterTemplate {
    pub kinds: Vec<u16>,
}

impl Default for FilterTemplate {
    fn default() -> Self {
        Self {
            kinds: vec![KIND_GIFT_WRAP],
        }
    }
}

impl FilterTemplate {
    /// Events of these kinds tagged to `recipient`, created at or after `since`.
    pub fn build(&self, recipient: &RecipientKey, since: u64) -> Filter {
        Filter::new()
            .kinds(self.kinds.clone())
            .pubkey_refs(vec![recipient.as_hex().to_string()])
            .since(since)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    pub link: LinkConfig,
    pub pow: PowPolicy,
}

/// One relay watch belonging to a recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    pub relay: RelayUrl,
    pub subscription_id: String,
}

/// Result of a registration; also what the registry keeps per recipient.
#[derive(Debug, Clone)]
pub struct Registration {
    pub recipient: RecipientKey,
    pub watches: Vec<Watch>,
    /// Relay strings that did not parse as websocket URLs.
    pub rejected_relays: Vec<String>,
    /// Lower time bound of every filter in this registration.
    pub since: u64,
}

struct Route {
    recipient: RecipientKey,
    handler: Arc<dyn EventHandler>,
}

/// Relay sink shared by every pooled link.
struct Router {
    routes: RwLock<HashMap<String, Route>>,
    pipeline: AdmissionPipeline,
    metrics: Arc<BridgeMetrics>,
}

impl Router {
    fn dispatch(&self, handler: Arc<dyn EventHandler>, admitted: AdmittedEvent) {
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            let event_id = admitted.event.id.clone();
            let recipient = admitted.recipient.short().to_string();

            match AssertUnwindSafe(handler.handle(admitted)).catch_unwind().await {
                Ok(Ok(())) => {
                    metrics.delivery_succeeded();
                    debug!("Delivered {} to {}", event_id, recipient);
                }
                Ok(Err(e)) => {
                    metrics.delivery_failed();
                    warn!("Delivery of {} to {} failed: {}", event_id, recipient, e);
                }
                Err(_) => {
                    metrics.handler_panicked();
                    error!("Handler panicked delivering {} to {}", event_id, recipient);
                }
            }
        });
    }

    fn count_rejection(&self, rejection: &Rejection) {
        match rejection {
            Rejection::InvalidSignature => self.metrics.event_rejected_signature(),
            Rejection::Duplicate => self.metrics.event_rejected_duplicate(),
            Rejection::InsufficientWork { .. } => self.metrics.event_rejected_pow(),
            Rejection::Ledger(_) => self.metrics.event_rejected_ledger(),
        }
    }
}

#[async_trait]
impl RelaySink for Router {
    async fn on_event(&self, relay: &RelayUrl, subscription_id: &str, event: Event) {
        let route = self
            .routes
            .read()
            .get(subscription_id)
            .map(|route| (route.recipient.clone(), Arc::clone(&route.handler)));

        // A watch withdrawn while its frames were in flight.
        let Some((recipient, handler)) = route else {
            debug!(
                "Dropping event {} from {}: no route for {}",
                event.id, relay, subscription_id
            );
            return;
        };

        self.metrics.event_received();
        match self.pipeline.admit(event, &recipient, relay).await {
            Ok(admitted) => {
                // Held while dispatching so a concurrent withdraw either
                // happens first or waits until the handler is on its way.
                let routes = self.routes.read();
                if !routes.contains_key(subscription_id) {
                    debug!(
                        "Dropping event {} for {}: watch withdrawn during admission",
                        admitted.event.id,
                        recipient.short()
                    );
                    return;
                }
                self.metrics.event_admitted(admitted.trusted);
                info!(
                    "Admitted {} for {} from {} (pow {}{})",
                    admitted.event.id,
                    recipient.short(),
                    relay,
                    admitted.difficulty,
                    if admitted.trusted { ", trusted" } else { "" }
                );
                self.dispatch(handler, admitted);
            }
            Err(Rejection::Ledger(e)) => {
                self.metrics.event_rejected_ledger();
                warn!("Dropping event for {}: ledger error: {}", recipient.short(), e);
            }
            Err(rejection) => {
                self.count_rejection(&rejection);
                debug!(
                    "Rejected event for {} from {}: {}",
                    recipient.short(),
                    relay,
                    rejection
                );
            }
        }
    }

    async fn on_closed(&self, relay: &RelayUrl, subscription_id: &str, message: &str) {
        let recipient = self
            .routes
            .read()
            .get(subscription_id)
            .map(|route| route.recipient.short().to_string());
        if let Some(recipient) = recipient {
            warn!(
                "Relay {} closed watch for {}: {}",
                relay, recipient, message
            );
        }
    }

    async fn on_notice(&self, relay: &RelayUrl, message: &str) {
        debug!("Notice from {}: {}", relay, message);
    }

    async fn on_transport_error(&self, relay: &RelayUrl, error: &ClientError) {
        debug!("Transport error on {}: {}", relay, error);
    }
}

/// Subscription id for one (recipient, relay) watch of one registration.
pub fn derive_subscription_id(recipient: &RecipientKey, relay: &RelayUrl, sequence: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(recipient.as_hex().as_bytes());
    hasher.update(relay.as_str().as_bytes());
    hasher.update(sequence.to_be_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

pub struct SubscriptionRegistry {
    recipients: Mutex<HashMap<RecipientKey, Registration>>,
    pool: ConnectionPool,
    router: Arc<Router>,
    sequence: AtomicU64,
    closed: AtomicBool,
    metrics: Arc<BridgeMetrics>,
}

impl SubscriptionRegistry {
    pub fn new(
        connector: Arc<dyn Connector>,
        ledger: Arc<dyn DedupLedger>,
        config: RegistryConfig,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        let router = Arc::new(Router {
            routes: RwLock::new(HashMap::new()),
            pipeline: AdmissionPipeline::new(ledger, config.pow),
            metrics: Arc::clone(&metrics),
        });
        let pool = ConnectionPool::new(config.link, connector, router.clone());

        Self {
            recipients: Mutex::new(HashMap::new()),
            pool,
            router,
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            metrics,
        }
    }

    /// Watch `relays` for events addressed to `recipient`.
    ///
    /// Replaces any existing registration for the recipient: the old watches
    /// are closed first. Relays that fail to parse are skipped and reported.
    /// Unreachable relays do not fail the call; their links keep retrying.
    pub async fn register(
        &self,
        recipient: &str,
        relays: &[String],
        template: &FilterTemplate,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Registration> {
        let recipient = RecipientKey::parse(recipient)?;

        let mut urls = Vec::new();
        let mut seen = HashSet::new();
        let mut rejected_relays = Vec::new();
        for relay in relays {
            match RelayUrl::parse(relay) {
                Ok(url) => {
                    if seen.insert(url.clone()) {
                        urls.push(url);
                    }
                }
                Err(e) => {
                    warn!(
                        "Skipping relay {:?} for {}: {}",
                        relay,
                        recipient.short(),
                        e
                    );
                    rejected_relays.push(relay.clone());
                }
            }
        }

        let mut recipients = self.recipients.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Client(ClientError::Shutdown));
        }

        if let Some(previous) = recipients.remove(&recipient) {
            debug!("Replacing registration for {}", recipient.short());
            self.teardown(&previous).await;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let since = chrono::Utc::now().timestamp().max(0) as u64;
        let filter = template.build(&recipient, since);

        let mut registration = Registration {
            recipient: recipient.clone(),
            watches: Vec::with_capacity(urls.len()),
            rejected_relays,
            since,
        };

        for url in urls {
            let subscription_id = derive_subscription_id(&recipient, &url, sequence);
            self.router.routes.write().insert(
                subscription_id.clone(),
                Route {
                    recipient: recipient.clone(),
                    handler: Arc::clone(&handler),
                },
            );

            let link = self.pool.acquire(&url).await;
            registration.watches.push(Watch {
                relay: url,
                subscription_id: subscription_id.clone(),
            });

            if let Err(e) = link.subscribe(subscription_id, filter.clone()) {
                self.teardown(&registration).await;
                return Err(e.into());
            }
        }

        info!(
            "Registered {} on {} relay(s)",
            recipient.short(),
            registration.watches.len()
        );
        self.metrics.recipient_registered();
        recipients.insert(recipient, registration.clone());
        Ok(registration)
    }

    /// Stop watching for `recipient`. Returns false if it was not registered.
    ///
    /// No handler call starts after this returns; calls already dispatched
    /// still run to completion.
    pub async fn withdraw(&self, recipient: &RecipientKey) -> bool {
        let mut recipients = self.recipients.lock().await;
        let Some(registration) = recipients.remove(recipient) else {
            return false;
        };
        self.teardown(&registration).await;
        self.metrics.recipient_withdrawn();
        info!("Withdrew {}", recipient.short());
        true
    }

    /// Remove routes first so no frame reaches the old handler, then close
    /// each watch and drop the pool reference.
    async fn teardown(&self, registration: &Registration) {
        {
            let mut routes = self.router.routes.write();
            for watch in &registration.watches {
                routes.remove(&watch.subscription_id);
            }
        }

        for watch in &registration.watches {
            if let Some(link) = self.pool.link(&watch.relay).await {
                link.unsubscribe(&watch.subscription_id);
            }
            self.pool.release(&watch.relay).await;
        }
    }

    pub async fn is_registered(&self, recipient: &RecipientKey) -> bool {
        self.recipients.lock().await.contains_key(recipient)
    }

    pub async fn subscription(&self, recipient: &RecipientKey) -> Option<Registration> {
        self.recipients.lock().await.get(recipient).cloned()
    }

    pub async fn recipient_count(&self) -> usize {
        self.recipients.lock().await.len()
    }

    /// Distinct relays with a live link.
    pub async fn relay_count(&self) -> usize {
        self.pool.len().await
    }

    pub async fn link_stats(&self) -> Vec<LinkStats> {
        self.pool.stats().await
    }

    pub fn route_count(&self) -> usize {
        self.router.routes.read().len()
    }

    /// Drop every registration and close every link within `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        let mut recipients = self.recipients.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        recipients.clear();
        self.router.routes.write().clear();
        self.pool.shutdown(grace).await;
        info!("Subscription registry shut down");
    }
}
