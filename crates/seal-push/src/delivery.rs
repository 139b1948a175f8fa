//! Push delivery through ntfy.
//!
//! The core hands each admitted event to a [`Notifier`] exactly once and
//! never retries. Only metadata leaves the process; the encrypted payload
//! stays on the relays.

use crate::admission::AdmittedEvent;
use crate::error::{BridgeError, Result};
use crate::registry::EventHandler;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT_SECS: u64 = 5;
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// What a notifier learns about an admitted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub event_id: String,
    pub recipient: String,
    pub relay: String,
    pub kind: u16,
    pub created_at: u64,
    pub difficulty: u32,
    pub trusted: bool,
}

impl From<&AdmittedEvent> for EventSummary {
    fn from(admitted: &AdmittedEvent) -> Self {
        Self {
            event_id: admitted.event.id.clone(),
            recipient: admitted.recipient.to_string(),
            relay: admitted.relay.to_string(),
            kind: admitted.event.kind,
            created_at: admitted.event.created_at,
            difficulty: admitted.difficulty,
            trusted: admitted.trusted,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Deliver one notification to `target`.
    async fn notify(&self, target: &str, summary: &EventSummary) -> Result<()>;
}

/// Delivery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// ntfy server base URL
    pub server: String,
    pub title: String,
    pub message: String,
    /// One of min, low, default, high, urgent
    pub priority: String,
    /// URL opened when the notification is tapped
    pub click: Option<String>,
    pub icon: Option<String>,
    pub tags: Vec<String>,
    /// Notifications per topic per window, for untrusted events
    pub rate_limit: usize,
    pub rate_window_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            server: "https://ntfy.sh".to_string(),
            title: "Seal".to_string(),
            message: "New encrypted message".to_string(),
            priority: "high".to_string(),
            click: Some("https://seal.dev".to_string()),
            icon: None,
            tags: Vec::new(),
            rate_limit: 10,
            rate_window_secs: 60,
        }
    }
}

/// Notifier that POSTs to an ntfy topic.
#[derive(Clone)]
pub struct NtfyNotifier {
    http: Client,
    config: DeliveryConfig,
}

impl NtfyNotifier {
    pub fn new(config: DeliveryConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, config })
    }

    fn topic_url(&self, topic: &str) -> Result<String> {
        if topic.is_empty() || topic.contains('/') {
            return Err(BridgeError::Delivery(format!("invalid topic {:?}", topic)));
        }
        let base = self.config.server.trim_end_matches('/');
        Ok(format!("{base}/{topic}"))
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn notify(&self, target: &str, summary: &EventSummary) -> Result<()> {
        let url = self.topic_url(target)?;

        let mut request = self
            .http
            .post(&url)
            .header("Title", &self.config.title)
            .header("Priority", &self.config.priority);
        if let Some(click) = &self.config.click {
            request = request.header("Click", click);
        }
        if let Some(icon) = &self.config.icon {
            request = request.header("Icon", icon);
        }
        if !self.config.tags.is_empty() {
            request = request.header("Tags", self.config.tags.join(","));
        }

        let response = request.body(self.config.message.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Delivery(format!(
                "ntfy returned {} for {}",
                status, summary.event_id
            )));
        }

        info!("Sent notification to topic: {}", target);
        Ok(())
    }
}

/// Sliding-window limit on notifications per topic.
pub struct TopicRateLimiter {
    max: usize,
    window: Duration,
    sent: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl TopicRateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            sent: Mutex::new(HashMap::new()),
        }
    }

    /// Take one slot for `topic` if the window has room.
    pub fn check(&self, topic: &str) -> bool {
        let now = Instant::now();
        let mut sent = self.sent.lock();
        for recent in sent.values_mut() {
            while recent
                .front()
                .is_some_and(|at| now.duration_since(*at) >= self.window)
            {
                recent.pop_front();
            }
        }
        sent.retain(|_, recent| !recent.is_empty());

        let recent = sent.entry(topic.to_string()).or_default();

        if recent.len() >= self.max {
            warn!("Rate limit exceeded for topic: {}", topic);
            return false;
        }
        recent.push_back(now);
        true
    }

    /// Topics with a notification still inside the window.
    pub fn tracked_topics(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Default for TopicRateLimiter {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(60))
    }
}

/// Handler that turns admitted events into notifications for one target.
///
/// Trusted events skip the rate limit.
pub struct NotifyHandler {
    notifier: Arc<dyn Notifier>,
    target: String,
    limiter: Arc<TopicRateLimiter>,
}

impl NotifyHandler {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        target: impl Into<String>,
        limiter: Arc<TopicRateLimiter>,
    ) -> Self {
        Self {
            notifier,
            target: target.into(),
            limiter,
        }
    }
}

#[async_trait]
impl EventHandler for NotifyHandler {
    async fn handle(&self, event: AdmittedEvent) -> Result<()> {
        if !event.trusted && !self.limiter.check(&self.target) {
            return Err(BridgeError::RateLimited(self.target.clone()));
        }
        let summary = EventSummary::from(&event);
        debug!(
            "Notifying {} about {} (pow {})",
            self.target, summary.event_id, summary.difficulty
        );
        self.notifier.notify(&self.target, &summary).await
    }
}
