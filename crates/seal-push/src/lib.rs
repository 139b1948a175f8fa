//! Push notifications for Nostr gift-wrapped messages.
//!
//! Watches relays on behalf of many recipients and turns every admitted
//! kind-1059 event into one push notification.
//!
//! - [`SubscriptionRegistry`] multiplexes recipients over a shared pool of
//!   relay links
//! - [`AdmissionPipeline`] verifies, deduplicates and gates events on
//!   proof of work
//! - [`Database`] persists recipients and the dedup ledger in SQLite
//! - [`NtfyNotifier`] delivers through an ntfy server
//! - [`Bridge`] wires it all together for the `seal-push` binary

pub mod admission;
pub mod bridge;
pub mod config;
pub mod delivery;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod recipient;
pub mod registry;
pub mod store;

pub use admission::{AdmissionPipeline, AdmittedEvent, PowClass, PowPolicy, Rejection};
pub use bridge::{Bridge, BridgeStats};
pub use config::BridgeConfig;
pub use delivery::{
    DeliveryConfig, EventSummary, Notifier, NotifyHandler, NtfyNotifier, TopicRateLimiter,
};
pub use error::{BridgeError, Result};
pub use ledger::{DedupLedger, MemoryLedger, spawn_purge_task};
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use recipient::RecipientKey;
pub use registry::{
    EventHandler, FilterTemplate, Registration, RegistryConfig, SubscriptionRegistry, Watch,
};
pub use store::{Database, DatabaseConfig, MemoryStore, RecipientRecord, RecipientStore, StoreStats};
