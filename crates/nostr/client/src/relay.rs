//! One long-lived link to one relay.
//!
//! A [`RelayLink`] owns a background task that connects, re-issues every
//! registered watch after each (re)connect, reads frames in arrival order and
//! hands them to a [`RelaySink`]. Transport failures never surface to callers:
//! the task backs off and reconnects until it is shut down. An open link pings
//! the relay and treats a transport that stays silent as failed.

use crate::backoff::{ExponentialBackoff, Jitter};
use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, Filter, RelayMessage, RelayUrl};
use crate::transport::{Connector, Frame, FrameSink, FrameStream};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use nostr::Event;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tracing::{debug, info, warn};

/// Link lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// First connection attempt in progress
    Connecting,
    /// Transport is up and watches have been (re)issued
    Open,
    /// Waiting out the backoff delay or retrying after a failure
    Reconnecting,
    /// Transport is down (momentarily after a failure, or for good after shutdown)
    Closed,
}

/// Inbound notification surface of a relay link.
///
/// Calls for one link are made sequentially from its task, in frame order.
#[async_trait]
pub trait RelaySink: Send + Sync + 'static {
    /// An EVENT frame for a subscription registered on this link.
    async fn on_event(&self, relay: &RelayUrl, subscription_id: &str, event: Event);

    async fn on_eose(&self, relay: &RelayUrl, subscription_id: &str) {
        debug!("EOSE from {} for {}", relay, subscription_id);
    }

    async fn on_closed(&self, _relay: &RelayUrl, _subscription_id: &str, _message: &str) {}

    async fn on_notice(&self, _relay: &RelayUrl, _message: &str) {}

    async fn on_open(&self, _relay: &RelayUrl) {}

    async fn on_transport_error(&self, _relay: &RelayUrl, _error: &ClientError) {}
}

/// Relay link configuration
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Initial reconnection delay
    pub reconnect_base_delay: Duration,
    /// Maximum reconnection delay
    pub reconnect_max_delay: Duration,
    /// Jitter applied to every reconnection delay
    pub jitter: Jitter,
    /// Ping interval for health checks
    pub ping_interval: Duration,
    /// How long past a ping the link waits for any inbound frame before
    /// treating the transport as dead
    pub pong_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
            jitter: Jitter::Equal,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

struct LinkInner {
    url: RelayUrl,
    state: watch::Sender<LinkState>,
    retries: AtomicU32,
    /// Watches to (re)issue on every connect: subscription id -> filter
    subscriptions: Mutex<HashMap<String, Filter>>,
    commands: mpsc::UnboundedSender<ClientMessage>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LinkInner {
    fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }
}

/// Handle to a relay link. Cheap to clone; every clone drives the same task.
#[derive(Clone)]
pub struct RelayLink {
    inner: Arc<LinkInner>,
}

impl std::fmt::Debug for RelayLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayLink")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("retries", &self.retry_count())
            .finish()
    }
}

impl RelayLink {
    /// Start the link task. Connection happens in the background.
    pub fn spawn(
        url: RelayUrl,
        config: LinkConfig,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn RelaySink>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LinkState::Connecting);
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(LinkInner {
            url,
            state,
            retries: AtomicU32::new(0),
            subscriptions: Mutex::new(HashMap::new()),
            commands,
            shutdown,
            task: Mutex::new(None),
        });

        let worker = LinkWorker {
            inner: Arc::clone(&inner),
            config,
            connector,
            sink,
            commands: command_rx,
        };
        *inner.task.lock() = Some(tokio::spawn(worker.run()));

        Self { inner }
    }

    /// Relay this link talks to.
    pub fn url(&self) -> &RelayUrl {
        &self.inner.url
    }

    /// Register a watch and issue its REQ. Re-issued on every reconnect.
    pub fn subscribe(&self, subscription_id: impl Into<String>, filter: Filter) -> Result<()> {
        if *self.inner.shutdown.borrow() {
            return Err(ClientError::Shutdown);
        }
        let subscription_id = subscription_id.into();
        self.inner
            .subscriptions
            .lock()
            .insert(subscription_id.clone(), filter.clone());
        self.inner
            .commands
            .send(ClientMessage::Req {
                subscription_id,
                filters: vec![filter],
            })
            .map_err(|_| ClientError::Shutdown)
    }

    /// Withdraw one watch and send CLOSE. The transport stays up.
    ///
    /// Returns false if the id was not registered on this link.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        if self.inner.subscriptions.lock().remove(subscription_id).is_none() {
            return false;
        }
        // A closed channel means the task is gone, and with it the relay-side watch.
        let _ = self.inner.commands.send(ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        });
        true
    }

    /// Registered watch ids, sorted.
    pub fn subscription_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.subscriptions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered watches.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    /// Filter registered under `subscription_id`.
    pub fn filter_for(&self, subscription_id: &str) -> Option<Filter> {
        self.inner.subscriptions.lock().get(subscription_id).cloned()
    }

    /// Failed attempts since the last successful open.
    pub fn retry_count(&self) -> u32 {
        self.inner.retries.load(Ordering::Relaxed)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// True once shutdown has been requested.
    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Signal the task to close the transport and stop. Does not wait.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Signal shutdown and wait up to `grace` for the task to finish,
    /// aborting it if the grace period runs out.
    pub async fn close(&self, grace: Duration) {
        self.shutdown();
        let Some(mut handle) = self.inner.task.lock().take() else {
            return;
        };
        if timeout(grace, &mut handle).await.is_err() {
            warn!(
                "Relay link {} did not stop within {:?}, aborting",
                self.inner.url, grace
            );
            handle.abort();
            self.inner.set_state(LinkState::Closed);
        }
    }
}

enum SessionEnd {
    Shutdown,
    Failed(ClientError),
}

struct LinkWorker {
    inner: Arc<LinkInner>,
    config: LinkConfig,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn RelaySink>,
    commands: mpsc::UnboundedReceiver<ClientMessage>,
}

async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    // An error means the sender is gone, which is as final as a shutdown.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

impl LinkWorker {
    async fn run(mut self) {
        let url = self.inner.url.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut backoff =
            ExponentialBackoff::new(self.config.reconnect_base_delay, self.config.reconnect_max_delay)
                .with_jitter(self.config.jitter);

        loop {
            info!("Connecting to relay: {}", url);
            let attempt = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                result = timeout(self.config.connect_timeout, self.connector.connect(&url)) => {
                    result.unwrap_or_else(|_| {
                        Err(ClientError::Timeout(format!(
                            "no connection within {:?}",
                            self.config.connect_timeout
                        )))
                    })
                }
            };

            let failure = match attempt {
                Ok((mut writer, mut reader)) => {
                    self.inner.retries.store(0, Ordering::Relaxed);
                    backoff.reset();
                    self.inner.set_state(LinkState::Open);
                    info!("Connected to relay: {}", url);
                    self.sink.on_open(&url).await;

                    match self.session(&mut writer, &mut reader, &mut shutdown).await {
                        SessionEnd::Shutdown => {
                            if timeout(self.config.connect_timeout, writer.close()).await.is_err() {
                                debug!("Relay {} did not acknowledge close", url);
                            }
                            break;
                        }
                        SessionEnd::Failed(error) => error,
                    }
                }
                Err(error) => error,
            };

            self.inner.set_state(LinkState::Closed);
            warn!("Relay {} transport failed: {}", url, failure);
            self.sink.on_transport_error(&url, &failure).await;

            self.inner.set_state(LinkState::Reconnecting);
            let delay = backoff.next_delay();
            let retries = self.inner.retries.fetch_add(1, Ordering::Relaxed) + 1;
            info!(
                "Waiting {:?} before reconnecting to {} (attempt {})",
                delay, url, retries
            );
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                _ = sleep(delay) => {}
            }
        }

        self.inner.set_state(LinkState::Closed);
        info!("Disconnected from relay: {}", url);
    }

    async fn session(
        &mut self,
        writer: &mut FrameSink,
        reader: &mut FrameStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        // Commands queued while offline are superseded by the registered set below.
        while self.commands.try_recv().is_ok() {}

        // What this transport has been asked to watch, to skip REQs that are
        // already in effect.
        let mut active: HashMap<String, Vec<Filter>> = HashMap::new();

        let watches: Vec<(String, Filter)> = self
            .inner
            .subscriptions
            .lock()
            .iter()
            .map(|(id, filter)| (id.clone(), filter.clone()))
            .collect();
        if !watches.is_empty() {
            info!(
                "Issuing {} subscription(s) to {}",
                watches.len(),
                self.inner.url
            );
        }
        for (subscription_id, filter) in watches {
            let req = ClientMessage::Req {
                subscription_id: subscription_id.clone(),
                filters: vec![filter],
            };
            if let Err(e) = send(writer, &req).await {
                return SessionEnd::Failed(e);
            }
            if let ClientMessage::Req { filters, .. } = req {
                active.insert(subscription_id, filters);
            }
        }

        let ping_interval = self.config.ping_interval.max(Duration::from_millis(1));
        let mut heartbeat = interval_at(Instant::now() + ping_interval, ping_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = cancelled(shutdown) => return SessionEnd::Shutdown,
                _ = heartbeat.tick() => {
                    let silent = last_seen.elapsed();
                    if silent >= ping_interval + self.config.pong_timeout {
                        return SessionEnd::Failed(ClientError::Timeout(format!(
                            "no frames for {:?}",
                            silent
                        )));
                    }
                    if let Err(e) = writer.send(Frame::Ping).await {
                        return SessionEnd::Failed(e);
                    }
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return SessionEnd::Shutdown;
                    };
                    match &command {
                        ClientMessage::Req { subscription_id, filters } => {
                            if active.get(subscription_id) == Some(filters) {
                                continue;
                            }
                            active.insert(subscription_id.clone(), filters.clone());
                        }
                        ClientMessage::Close { subscription_id } => {
                            active.remove(subscription_id);
                        }
                    }
                    if let Err(e) = send(writer, &command).await {
                        return SessionEnd::Failed(e);
                    }
                }
                frame = reader.next() => match frame {
                    Some(Ok(frame)) => {
                        if let Frame::Text(text) = frame {
                            self.dispatch(&text).await;
                        }
                        last_seen = Instant::now();
                    }
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    None => return SessionEnd::Failed(ClientError::Closed),
                },
            }
        }
    }

    async fn dispatch(&self, text: &str) {
        let url = &self.inner.url;
        let message = match RelayMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring malformed frame from {}: {}", url, e);
                return;
            }
        };

        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                if !self.inner.subscriptions.lock().contains_key(&subscription_id) {
                    debug!(
                        "Dropping event {} for unknown subscription {} on {}",
                        event.id, subscription_id, url
                    );
                    return;
                }
                self.sink.on_event(url, &subscription_id, event).await;
            }
            RelayMessage::Eose { subscription_id } => {
                self.sink.on_eose(url, &subscription_id).await;
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                warn!(
                    "Relay {} closed subscription {}: {}",
                    url, subscription_id, message
                );
                self.sink.on_closed(url, &subscription_id, &message).await;
            }
            RelayMessage::Notice { message } => {
                info!("Notice from {}: {}", url, message);
                self.sink.on_notice(url, &message).await;
            }
            RelayMessage::Auth { .. } => {
                debug!("Ignoring AUTH challenge from {}", url);
            }
        }
    }
}

async fn send(writer: &mut FrameSink, message: &ClientMessage) -> Result<()> {
    let text = message.to_json()?;
    debug!("Sending: {}", text);
    writer.send(Frame::Text(text)).await
}
