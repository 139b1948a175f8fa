//! Nostr relay client for long-lived watchers.
//!
//! This crate provides:
//! - Relay protocol messages (NIP-01 REQ/CLOSE out, EVENT/EOSE/CLOSED/NOTICE in)
//! - [`RelayLink`]: one self-healing connection per relay that re-issues its
//!   watches after every reconnect
//! - [`ConnectionPool`]: reference-counted links shared across callers
//! - A [`Connector`] seam with a websocket implementation and, behind the
//!   `test-utils` feature, an in-memory relay
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use nostr::Event;
//! use nostr_client::{ConnectionPool, Filter, LinkConfig, RelaySink, RelayUrl, WebSocketConnector};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl RelaySink for Printer {
//!     async fn on_event(&self, relay: &RelayUrl, subscription_id: &str, event: Event) {
//!         println!("{} {} {}", relay, subscription_id, event.id);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), nostr_client::ClientError> {
//!     let pool = ConnectionPool::new(
//!         LinkConfig::default(),
//!         Arc::new(WebSocketConnector),
//!         Arc::new(Printer),
//!     );
//!     let url = RelayUrl::parse("wss://relay.damus.io")?;
//!     let link = pool.acquire(&url).await;
//!     link.subscribe("gift-wraps", Filter::new().kinds(vec![1059]).limit(0))?;
//!     Ok(())
//! }
//! ```

mod backoff;
mod error;
mod message;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod pool;
mod relay;
mod transport;

pub use backoff::{ExponentialBackoff, Jitter};
pub use error::{ClientError, Result};
pub use message::{ClientMessage, Filter, MessageError, RelayMessage, RelayUrl};
pub use pool::{ConnectionPool, LinkStats};
pub use relay::{LinkConfig, LinkState, RelayLink, RelaySink};
pub use transport::{Connector, Frame, FrameSink, FrameStream, WebSocketConnector};
