//! Shared helpers for seal-push integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use nostr::{Event, EventTemplate, finalize_event, generate_secret_key, get_public_key_hex};
use nostr_client::mock::MockConnector;
use nostr_client::{Jitter, LinkConfig};
use parking_lot::Mutex;
use seal_push::{
    AdmittedEvent, BridgeError, BridgeMetrics, DedupLedger, EventHandler, EventSummary, Notifier,
    PowPolicy, RegistryConfig, Result, SubscriptionRegistry,
};
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll an expression (which may `.await`) until it holds or [`WAIT`] passes.
macro_rules! eventually {
    ($cond:expr) => {{
        let deadline = tokio::time::Instant::now() + crate::common::WAIT;
        loop {
            if $cond {
                break true;
            }
            if tokio::time::Instant::now() >= deadline {
                break false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }};
}

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

pub fn fast_link() -> LinkConfig {
    LinkConfig {
        connect_timeout: Duration::from_secs(1),
        reconnect_base_delay: Duration::from_millis(10),
        reconnect_max_delay: Duration::from_millis(50),
        jitter: Jitter::None,
        ..LinkConfig::default()
    }
}

/// Accepts any proof of work; nothing is trusted.
pub fn open_pow() -> PowPolicy {
    PowPolicy {
        minimum: 0,
        trusted: 256,
    }
}

pub fn registry(
    connector: &Arc<MockConnector>,
    ledger: Arc<dyn DedupLedger>,
    pow: PowPolicy,
) -> (SubscriptionRegistry, Arc<BridgeMetrics>) {
    init_tracing();
    let metrics = Arc::new(BridgeMetrics::new());
    let registry = SubscriptionRegistry::new(
        connector.clone(),
        ledger,
        RegistryConfig {
            link: fast_link(),
            pow,
        },
        metrics.clone(),
    );
    (registry, metrics)
}

/// A fresh recipient public key in hex.
pub fn recipient() -> String {
    get_public_key_hex(&generate_secret_key()).unwrap()
}

fn template(recipient: &str, content: &str) -> EventTemplate {
    EventTemplate {
        created_at: chrono::Utc::now().timestamp() as u64,
        kind: 1059,
        tags: vec![vec!["p".to_string(), recipient.to_string()]],
        content: content.to_string(),
    }
}

/// A signed gift wrap addressed to `recipient`.
pub fn gift_wrap(recipient: &str) -> Event {
    finalize_event(&template(recipient, "sealed"), &generate_secret_key()).unwrap()
}

/// A signed gift wrap whose id has fewer than `bits` leading zero bits.
pub fn gift_wrap_below(recipient: &str, bits: u32) -> Event {
    loop {
        let event = gift_wrap(recipient);
        if nostr::event_difficulty(&event) < bits {
            return event;
        }
    }
}

/// A gift wrap mined to at least `bits` leading zero bits.
pub fn mined_gift_wrap(recipient: &str, bits: u32) -> Event {
    nostr::mine_event(&template(recipient, "mined"), &generate_secret_key(), bits).unwrap()
}

/// Handler that records every call.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<AdmittedEvent>>,
    fail: AtomicBool,
    panic_next: AtomicBool,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call returns a delivery error (after being recorded).
    pub fn failing() -> Arc<Self> {
        let handler = Self::default();
        handler.fail.store(true, Ordering::SeqCst);
        Arc::new(handler)
    }

    /// The first call panics; later calls are recorded.
    pub fn panicking_once() -> Arc<Self> {
        let handler = Self::default();
        handler.panic_next.store(true, Ordering::SeqCst);
        Arc::new(handler)
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn event_ids(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.event.id.clone()).collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: AdmittedEvent) -> Result<()> {
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("handler exploded on {}", event.event.id);
        }
        self.events.lock().push(event);
        if self.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::Delivery("push service down".to_string()));
        }
        Ok(())
    }
}

/// Notifier that records (target, summary) pairs.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, EventSummary)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, EventSummary)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, target: &str, summary: &EventSummary) -> Result<()> {
        self.sent.lock().push((target.to_string(), summary.clone()));
        Ok(())
    }
}
