//! Bridge façade: persistence, restore and end-to-end notification.

#[macro_use]
mod common;

use common::*;
use nostr_client::mock::MockConnector;
use seal_push::{
    Bridge, BridgeConfig, BridgeError, Database, DatabaseConfig, DedupLedger, MemoryLedger,
    MemoryStore, RecipientKey, RecipientRecord, RecipientStore,
};
use std::sync::Arc;

fn config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.relays.defaults = vec!["wss://default.test".to_string()];
    config.relays.reconnect_base_ms = 10;
    config.relays.reconnect_max_secs = 1;
    config.admission.pow_minimum = 0;
    config.admission.pow_trusted = 256;
    config
}

fn bridge(
    connector: &Arc<MockConnector>,
    store: Arc<dyn RecipientStore>,
    ledger: Arc<dyn DedupLedger>,
    notifier: &Arc<RecordingNotifier>,
) -> Bridge {
    init_tracing();
    Bridge::new(config(), store, ledger, connector.clone(), notifier.clone())
}

#[tokio::test]
async fn test_subscribe_persists_and_notifies() {
    let connector = Arc::new(MockConnector::new());
    let relay = connector.relay("wss://default.test");
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(MemoryStore::new());
    let bridge = bridge(&connector, store.clone(), Arc::new(MemoryLedger::new()), &notifier);

    let alice = recipient();
    let registration = bridge.subscribe(&alice, &[], " alice-topic ").await.unwrap();
    assert_eq!(registration.watches.len(), 1);
    assert_eq!(registration.watches[0].relay.as_str(), "wss://default.test/");

    let stored = store.list_all().await.unwrap();
    assert_eq!(
        stored,
        vec![RecipientRecord {
            recipient: alice.clone(),
            relays: vec!["wss://default.test".to_string()],
            delivery_target: "alice-topic".to_string(),
        }]
    );

    assert!(relay.wait_until(|r| r.requests().len() == 1, WAIT).await);
    let event = gift_wrap(&alice);
    relay.push_event(&registration.watches[0].subscription_id, &event);

    assert!(eventually!(notifier.sent().len() == 1));
    let (target, summary) = notifier.sent().remove(0);
    assert_eq!(target, "alice-topic");
    assert_eq!(summary.event_id, event.id);
    assert_eq!(summary.recipient, alice);
    assert_eq!(summary.kind, 1059);
    assert!(eventually!(bridge.metrics().snapshot().delivered == 1));

    bridge.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_subscribe_rejects_bad_input_without_storing() {
    let connector = Arc::new(MockConnector::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(MemoryStore::new());
    let bridge = bridge(&connector, store.clone(), Arc::new(MemoryLedger::new()), &notifier);

    let bad_key = bridge.subscribe("npub1nope", &[], "topic").await;
    assert!(matches!(bad_key, Err(BridgeError::InvalidRecipientKey(_))));

    let no_target = bridge.subscribe(&recipient(), &[], "  ").await;
    assert!(matches!(no_target, Err(BridgeError::Delivery(_))));

    assert!(store.list_all().await.unwrap().is_empty());
    assert_eq!(bridge.registry().recipient_count().await, 0);
}

#[tokio::test]
async fn test_restore_from_database_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_config = DatabaseConfig {
        path: dir.path().join("seal-push.db"),
    };
    let connector = Arc::new(MockConnector::new());
    let relay = connector.relay("wss://one.test");
    let notifier = Arc::new(RecordingNotifier::default());

    let alice = recipient();
    let bob = recipient();
    {
        let db = Arc::new(Database::open(&db_config).unwrap());
        let bridge = bridge(&connector, db.clone(), db.clone(), &notifier);
        bridge
            .subscribe(&alice, &["wss://one.test".to_string()], "alice")
            .await
            .unwrap();
        bridge
            .subscribe(&bob, &["wss://one.test".to_string()], "bob")
            .await
            .unwrap();
        bridge.shutdown(WAIT).await;
    }

    let db = Arc::new(Database::open(&db_config).unwrap());
    let bridge = bridge(&connector, db.clone(), db.clone(), &notifier);
    assert_eq!(bridge.registry().recipient_count().await, 0);
    assert_eq!(bridge.restore().await.unwrap(), 2);

    let stats = bridge.stats().await;
    assert_eq!(stats.recipients, 2);
    assert_eq!(stats.relays, 1);
    assert_eq!(stats.links[0].refs, 2);
    assert_eq!(stats.metrics.registrations, 2);

    // Two REQs from the first process, two from the restored one.
    assert!(relay.wait_until(|r| r.requests().len() == 4, WAIT).await);

    bridge.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_restore_skips_bad_records() {
    let connector = Arc::new(MockConnector::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(MemoryStore::new());
    store
        .upsert(&RecipientRecord {
            recipient: "not-a-key".to_string(),
            relays: vec!["wss://r.test".to_string()],
            delivery_target: "broken".to_string(),
        })
        .await
        .unwrap();
    store
        .upsert(&RecipientRecord {
            recipient: recipient(),
            relays: vec!["wss://r.test".to_string()],
            delivery_target: "fine".to_string(),
        })
        .await
        .unwrap();

    let bridge = bridge(&connector, store, Arc::new(MemoryLedger::new()), &notifier);
    assert_eq!(bridge.restore().await.unwrap(), 1);
    assert_eq!(bridge.registry().recipient_count().await, 1);

    bridge.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_unsubscribe_forgets_recipient() {
    let connector = Arc::new(MockConnector::new());
    let relay = connector.relay("wss://r.test");
    let notifier = Arc::new(RecordingNotifier::default());
    let db = Arc::new(Database::open_in_memory().unwrap());
    let bridge = bridge(&connector, db.clone(), db.clone(), &notifier);

    let alice = recipient();
    let registration = bridge
        .subscribe(&alice, &["wss://r.test".to_string()], "alice")
        .await
        .unwrap();
    assert!(relay.wait_until(|r| r.requests().len() == 1, WAIT).await);
    relay.push_event(&registration.watches[0].subscription_id, &gift_wrap(&alice));
    assert!(eventually!(notifier.sent().len() == 1));

    let key = RecipientKey::parse(&alice).unwrap();
    let npub = key.to_npub().unwrap();
    assert!(bridge.unsubscribe(&npub).await.unwrap());
    assert!(!bridge.unsubscribe(&npub).await.unwrap());

    let stats = db.stats().await.unwrap();
    assert_eq!(stats.recipients, 0);
    assert_eq!(stats.admitted_events, 0);
    assert!(!bridge.registry().is_registered(&key).await);
    assert!(relay.wait_until(|r| !r.is_connected(), WAIT).await);
    assert_eq!(bridge.metrics().snapshot().withdrawals, 1);

    bridge.shutdown(WAIT).await;
}

#[tokio::test]
async fn test_trusted_events_bypass_rate_limit() {
    let connector = Arc::new(MockConnector::new());
    let relay = connector.relay("wss://r.test");
    let notifier = Arc::new(RecordingNotifier::default());
    let mut config = config();
    config.delivery.rate_limit = 1;
    config.admission.pow_trusted = 8;
    init_tracing();
    let bridge = Bridge::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryLedger::new()),
        connector.clone(),
        notifier.clone(),
    );

    let alice = recipient();
    let registration = bridge
        .subscribe(&alice, &["wss://r.test".to_string()], "alice")
        .await
        .unwrap();
    assert!(relay.wait_until(|r| r.requests().len() == 1, WAIT).await);
    let id = &registration.watches[0].subscription_id;

    relay.push_event(id, &gift_wrap_below(&alice, 8));
    relay.push_event(id, &gift_wrap_below(&alice, 8));
    relay.push_event(id, &mined_gift_wrap(&alice, 8));

    assert!(eventually!(
        bridge.metrics().snapshot().delivered == 2
            && bridge.metrics().snapshot().delivery_failures == 1
    ));
    let sent = notifier.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent.iter().filter(|(_, s)| s.trusted).count(), 1);

    bridge.shutdown(WAIT).await;
}
