//! In-memory relays for tests.
//!
//! [`MockConnector`] hands out transports backed by channels instead of
//! sockets. Each [`MockRelay`] records every frame a link sends, can push
//! frames to the live connection, refuse connections, drop the current one
//! to force a reconnect, or stop answering pings to look half-open.

use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, Filter, RelayMessage, RelayUrl};
use crate::relay::RelaySink;
use crate::transport::{Connector, Frame, FrameSink, FrameStream};
use async_trait::async_trait;
use nostr::Event;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct RelayState {
    offline: AtomicBool,
    /// Swallow pings instead of answering them
    silent: AtomicBool,
    connections: AtomicUsize,
    pings: AtomicUsize,
    /// Bumped on every connect and drop; stale sinks stop accepting frames.
    generation: AtomicU64,
    current: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    sent: Mutex<Vec<String>>,
}

/// Handle to one in-memory relay.
#[derive(Clone, Default)]
pub struct MockRelay {
    state: Arc<RelayState>,
}

impl MockRelay {
    /// Accept (true) or refuse (false) new connections.
    pub fn set_online(&self, online: bool) {
        self.state.offline.store(!online, Ordering::SeqCst);
    }

    /// Answer pings (true, the default) or let them go unanswered.
    pub fn set_responsive(&self, responsive: bool) {
        self.state.silent.store(!responsive, Ordering::SeqCst);
    }

    /// Pings received from links.
    pub fn ping_count(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    /// Connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .current
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Send a raw frame to the connected link. False if nobody is connected.
    pub fn push_frame(&self, frame: impl Into<String>) -> bool {
        match self.state.current.lock().as_ref() {
            Some(tx) => tx.send(Frame::Text(frame.into())).is_ok(),
            None => false,
        }
    }

    pub fn push_event(&self, subscription_id: &str, event: &Event) -> bool {
        self.push_frame(RelayMessage::event_frame(subscription_id, event))
    }

    /// Kill the live connection as if the network failed.
    pub fn drop_connection(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        self.state.current.lock().take();
    }

    /// Every text frame received from links, in order.
    pub fn sent_frames(&self) -> Vec<String> {
        self.state.sent.lock().clone()
    }

    /// Every REQ received, as (subscription id, first filter).
    pub fn requests(&self) -> Vec<(String, Filter)> {
        self.parsed()
            .into_iter()
            .filter_map(|message| match message {
                ClientMessage::Req {
                    subscription_id,
                    mut filters,
                } if !filters.is_empty() => Some((subscription_id, filters.remove(0))),
                _ => None,
            })
            .collect()
    }

    /// Subscription ids of every CLOSE received.
    pub fn closes(&self) -> Vec<String> {
        self.parsed()
            .into_iter()
            .filter_map(|message| match message {
                ClientMessage::Close { subscription_id } => Some(subscription_id),
                _ => None,
            })
            .collect()
    }

    fn parsed(&self) -> Vec<ClientMessage> {
        self.sent_frames()
            .iter()
            .filter_map(|frame| ClientMessage::from_json(frame).ok())
            .collect()
    }

    /// Poll `predicate` until it holds or `within` elapses.
    pub async fn wait_until(&self, predicate: impl Fn(&MockRelay) -> bool, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if predicate(self) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn accept(&self) -> Result<(FrameSink, FrameStream)> {
        if self.state.offline.load(Ordering::SeqCst) {
            return Err(ClientError::Connection("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel::<Frame>();
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.current.lock() = Some(tx);
        self.state.connections.fetch_add(1, Ordering::SeqCst);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (Ok::<_, ClientError>(frame), rx))
        });

        let sink = futures::sink::unfold(
            Arc::clone(&self.state),
            move |state: Arc<RelayState>, frame: Frame| async move {
                if state.generation.load(Ordering::SeqCst) != generation {
                    return Err(ClientError::Closed);
                }
                match frame {
                    Frame::Text(text) => state.sent.lock().push(text),
                    Frame::Ping => {
                        state.pings.fetch_add(1, Ordering::SeqCst);
                        if !state.silent.load(Ordering::SeqCst)
                            && let Some(tx) = state.current.lock().as_ref()
                        {
                            let _ = tx.send(Frame::Pong);
                        }
                    }
                    Frame::Pong => {}
                }
                Ok(state)
            },
        );

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Connector that routes every URL to a [`MockRelay`], creating them on demand.
#[derive(Default)]
pub struct MockConnector {
    relays: Mutex<HashMap<RelayUrl, MockRelay>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the relay at `url`. Panics on an invalid URL.
    pub fn relay(&self, url: &str) -> MockRelay {
        let url = RelayUrl::parse(url).expect("mock relay url");
        self.relays.lock().entry(url).or_default().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &RelayUrl) -> Result<(FrameSink, FrameStream)> {
        let relay = self.relays.lock().entry(url.clone()).or_default().clone();
        relay.accept()
    }
}

/// Sink that records everything a link reports.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, Event)>>,
    eose: AtomicUsize,
    closed: AtomicUsize,
    opens: AtomicUsize,
    transport_errors: AtomicUsize,
}

impl RecordingSink {
    /// (subscription id, event) pairs in delivery order.
    pub fn events(&self) -> Vec<(String, Event)> {
        self.events.lock().clone()
    }

    pub fn eose_count(&self) -> usize {
        self.eose.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn transport_errors(&self) -> usize {
        self.transport_errors.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelaySink for RecordingSink {
    async fn on_event(&self, _relay: &RelayUrl, subscription_id: &str, event: Event) {
        self.events.lock().push((subscription_id.to_string(), event));
    }

    async fn on_eose(&self, _relay: &RelayUrl, _subscription_id: &str) {
        self.eose.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_closed(&self, _relay: &RelayUrl, _subscription_id: &str, _message: &str) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_open(&self, _relay: &RelayUrl) {
        self.opens.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_transport_error(&self, _relay: &RelayUrl, _error: &ClientError) {
        self.transport_errors.fetch_add(1, Ordering::SeqCst);
    }
}
