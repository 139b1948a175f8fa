//! Reference-counted pool of relay links.
//!
//! Every caller that needs a relay acquires it and later releases it. The pool
//! keeps exactly one [`RelayLink`] per relay URL, so the number of sockets
//! follows the number of distinct relays rather than callers times relays.

use crate::message::RelayUrl;
use crate::relay::{LinkConfig, LinkState, RelayLink, RelaySink};
use crate::transport::Connector;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

struct PooledLink {
    link: RelayLink,
    refs: usize,
}

/// Point-in-time view of one pooled link.
#[derive(Debug, Clone, Serialize)]
pub struct LinkStats {
    pub url: String,
    pub state: LinkState,
    pub refs: usize,
    pub retries: u32,
    pub subscriptions: usize,
}

/// A pool of relay links keyed by URL.
pub struct ConnectionPool {
    links: Mutex<HashMap<RelayUrl, PooledLink>>,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn RelaySink>,
    config: LinkConfig,
}

impl ConnectionPool {
    /// Empty pool whose links report to `sink`.
    pub fn new(config: LinkConfig, connector: Arc<dyn Connector>, sink: Arc<dyn RelaySink>) -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
            connector,
            sink,
            config,
        }
    }

    /// Get the link for `url`, creating it if needed, and take a reference.
    ///
    /// Never fails: a new link connects in the background and keeps retrying
    /// on its own.
    pub async fn acquire(&self, url: &RelayUrl) -> RelayLink {
        let mut links = self.links.lock().await;
        if let Some(pooled) = links.get_mut(url) {
            pooled.refs += 1;
            debug!("Reusing relay link {} (refs: {})", url, pooled.refs);
            return pooled.link.clone();
        }

        info!("Opening relay link: {}", url);
        let link = RelayLink::spawn(
            url.clone(),
            self.config.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.sink),
        );
        links.insert(
            url.clone(),
            PooledLink {
                link: link.clone(),
                refs: 1,
            },
        );
        link
    }

    /// Drop one reference. Returns true when this was the last one and the
    /// link was shut down and removed.
    pub async fn release(&self, url: &RelayUrl) -> bool {
        let mut links = self.links.lock().await;
        let Some(pooled) = links.get_mut(url) else {
            error!("Released relay {} which holds no references", url);
            debug_assert!(false, "released relay {} which holds no references", url);
            return false;
        };

        pooled.refs -= 1;
        if pooled.refs > 0 {
            debug!("Released relay link {} (refs: {})", url, pooled.refs);
            return false;
        }

        if let Some(pooled) = links.remove(url) {
            info!("Closing relay link {}: no references left", url);
            pooled.link.shutdown();
        }
        true
    }

    /// The live link for `url`, without taking a reference.
    pub async fn link(&self, url: &RelayUrl) -> Option<RelayLink> {
        self.links.lock().await.get(url).map(|p| p.link.clone())
    }

    /// References held on `url`; zero when it has no link.
    pub async fn ref_count(&self, url: &RelayUrl) -> usize {
        self.links.lock().await.get(url).map_or(0, |p| p.refs)
    }

    /// Number of distinct relays with a live link.
    pub async fn len(&self) -> usize {
        self.links.lock().await.len()
    }

    /// True when no link is open.
    pub async fn is_empty(&self) -> bool {
        self.links.lock().await.is_empty()
    }

    /// One entry per link, sorted by URL.
    pub async fn stats(&self) -> Vec<LinkStats> {
        let links = self.links.lock().await;
        let mut stats: Vec<LinkStats> = links
            .iter()
            .map(|(url, pooled)| LinkStats {
                url: url.to_string(),
                state: pooled.link.state(),
                refs: pooled.refs,
                retries: pooled.link.retry_count(),
                subscriptions: pooled.link.subscription_count(),
            })
            .collect();
        stats.sort_by(|a, b| a.url.cmp(&b.url));
        stats
    }

    /// Close every link concurrently, each bounded by `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        let links: Vec<RelayLink> = self
            .links
            .lock()
            .await
            .drain()
            .map(|(_, pooled)| pooled.link)
            .collect();
        if links.is_empty() {
            return;
        }
        info!("Shutting down {} relay link(s)", links.len());
        join_all(links.iter().map(|link| link.close(grace))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Filter;
    use crate::mock::{MockConnector, RecordingSink};

    const WAIT: Duration = Duration::from_secs(5);

    fn pool(connector: &Arc<MockConnector>) -> ConnectionPool {
        ConnectionPool::new(
            LinkConfig {
                reconnect_base_delay: Duration::from_millis(10),
                reconnect_max_delay: Duration::from_millis(50),
                ..LinkConfig::default()
            },
            connector.clone(),
            Arc::new(RecordingSink::default()),
        )
    }

    #[tokio::test]
    async fn test_shared_relay_uses_one_link() {
        let connector = Arc::new(MockConnector::new());
        let relay = connector.relay("wss://shared.test");
        let pool = pool(&connector);
        let url = RelayUrl::parse("wss://shared.test").unwrap();
        let same_url = RelayUrl::parse("wss://SHARED.test/").unwrap();

        let first = pool.acquire(&url).await;
        let second = pool.acquire(&same_url).await;
        first.subscribe("r1", Filter::new().kinds(vec![1059])).unwrap();
        second.subscribe("r2", Filter::new().kinds(vec![1059])).unwrap();

        assert!(relay.wait_until(|r| r.requests().len() == 2, WAIT).await);
        assert_eq!(pool.len().await, 1);
        assert_eq!(pool.ref_count(&url).await, 2);
        assert_eq!(relay.connection_count(), 1);

        pool.shutdown(WAIT).await;
    }

    #[tokio::test]
    async fn test_release_keeps_link_while_referenced() {
        let connector = Arc::new(MockConnector::new());
        let relay = connector.relay("wss://shared.test");
        let pool = pool(&connector);
        let url = RelayUrl::parse("wss://shared.test").unwrap();

        let link = pool.acquire(&url).await;
        pool.acquire(&url).await;
        link.subscribe("r2", Filter::new().kinds(vec![1059])).unwrap();
        assert!(relay.wait_until(|r| r.is_connected(), WAIT).await);

        assert!(!pool.release(&url).await);
        assert_eq!(pool.ref_count(&url).await, 1);
        assert!(!link.is_shut_down());
        assert!(relay.is_connected());

        assert!(pool.release(&url).await);
        assert!(pool.is_empty().await);
        assert!(link.is_shut_down());
        assert!(relay.wait_until(|r| !r.is_connected(), WAIT).await);
    }

    #[tokio::test]
    async fn test_reacquire_after_teardown_opens_new_link() {
        let connector = Arc::new(MockConnector::new());
        let relay = connector.relay("wss://again.test");
        let pool = pool(&connector);
        let url = RelayUrl::parse("wss://again.test").unwrap();

        let old = pool.acquire(&url).await;
        assert!(relay.wait_until(|r| r.connection_count() == 1, WAIT).await);
        assert!(pool.release(&url).await);

        let new = pool.acquire(&url).await;
        assert!(old.is_shut_down());
        assert!(!new.is_shut_down());
        assert!(relay.wait_until(|r| r.connection_count() == 2, WAIT).await);

        let stats = pool.stats().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].refs, 1);

        pool.shutdown(WAIT).await;
        assert_eq!(new.state(), LinkState::Closed);
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_still_acquired() {
        let connector = Arc::new(MockConnector::new());
        connector.relay("wss://down.test").set_online(false);
        let pool = pool(&connector);
        let url = RelayUrl::parse("wss://down.test").unwrap();

        let link = pool.acquire(&url).await;
        link.subscribe("r1", Filter::new()).unwrap();
        assert_eq!(pool.ref_count(&url).await, 1);
        assert_ne!(link.state(), LinkState::Open);

        pool.shutdown(WAIT).await;
        assert_eq!(link.state(), LinkState::Closed);
    }
}
