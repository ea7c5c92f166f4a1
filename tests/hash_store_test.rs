//! Store-over-hash-layout integration tests
//!
//! Runs the full store against the Redis-flavored hash backend and its
//! in-process transport: persisted field layout, change propagation between
//! two stores sharing a transport, and restore across the wire format.

mod common;

use common::{DataCenter, TestSettings, Tier, test_schema};
use nfig::store::hash::{COMMIT_FIELD, LAST_EVENT_FIELD};
use nfig::{
    HashBackend, HashStore, HashTransport, MemoryHashTransport, RestoreOptions,
    SetOverrideOptions, SettingsStore,
};
use parking_lot::Mutex;
use std::sync::Arc;

type Store = HashStore<TestSettings, Tier, DataCenter, Arc<MemoryHashTransport>>;

fn hash_store(transport: &Arc<MemoryHashTransport>, tier: Tier, dc: DataCenter) -> Arc<Store> {
    SettingsStore::new(
        test_schema(),
        tier,
        dc,
        HashBackend::new(Arc::clone(transport), tier),
    )
    .unwrap()
}

#[test]
fn test_persisted_field_layout() {
    let transport = Arc::new(MemoryHashTransport::new());
    let store = hash_store(&transport, Tier::Prod, DataCenter::East);

    let committed = store
        .set_override("app", "TopInteger", "3", DataCenter::Any, "alice", SetOverrideOptions::new())
        .unwrap()
        .unwrap();
    store
        .set_override(
            "app",
            "Nested.Integer",
            "9",
            DataCenter::East,
            "alice",
            SetOverrideOptions::new().sub_app(12),
        )
        .unwrap();

    let fields = transport.get_all("app").unwrap();
    let get = |name: &str| {
        fields
            .iter()
            .find(|(f, _)| f == name)
            .map(|(_, v)| v.clone())
    };

    // Legacy field form: :<tierOrd>:<dcOrd>;<name>, Prod = 3, Any = 0.
    assert_eq!(get(":3:0;TopInteger").as_deref(), Some("3"));
    // Sub-app overrides carry a third ordinal segment; East = 1.
    assert_eq!(get(":3:1:12;Nested.Integer").as_deref(), Some("9"));
    assert!(get(COMMIT_FIELD).is_some());
    assert_ne!(get(COMMIT_FIELD).as_deref(), Some(committed.commit.as_str()));
    assert!(get(LAST_EVENT_FIELD).unwrap().contains("\"SetOverride\""));
}

#[test]
fn test_publish_propagates_between_stores() {
    let transport = Arc::new(MemoryHashTransport::new());
    let writer = hash_store(&transport, Tier::Prod, DataCenter::East);
    let reader = hash_store(&transport, Tier::Prod, DataCenter::East);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let _subscription = reader.subscribe("app", move |update| {
        seen_clone.lock().push(update.unwrap().settings.top_integer);
    });
    assert_eq!(*seen.lock(), vec![23]);

    // A commit by the other store reaches this store's subscriber through
    // the NFig-AppUpdate channel.
    writer
        .set_override("app", "TopInteger", "42", DataCenter::Any, "alice", SetOverrideOptions::new())
        .unwrap();
    assert_eq!(*seen.lock(), vec![23, 42]);
    assert_eq!(reader.get_settings("app").unwrap().settings.top_integer, 42);
}

#[test]
fn test_expiring_override_round_trips_the_value_frame() {
    let transport = Arc::new(MemoryHashTransport::new());
    let store = hash_store(&transport, Tier::Prod, DataCenter::East);

    let expiry = time::OffsetDateTime::now_utc() + time::Duration::hours(1);
    store
        .set_override(
            "app",
            "ConnectionStrings.AdServer",
            "@framed",
            DataCenter::Any,
            "alice",
            SetOverrideOptions::new().expires_at(expiry),
        )
        .unwrap();

    let snapshot = store.get_snapshot("app").unwrap();
    let stored = &snapshot.overrides.get_all("ConnectionStrings.AdServer")[0];
    assert_eq!(stored.value, "@framed");
    // Millisecond precision survives the frame.
    let stored_expiry = stored.expires_at.unwrap();
    assert!((stored_expiry - expiry).whole_milliseconds().abs() <= 1);

    assert_eq!(
        store
            .get_settings("app")
            .unwrap()
            .settings
            .connection_strings
            .ad_server,
        "@framed"
    );
}

#[test]
fn test_restore_over_hash_backend() {
    let transport = Arc::new(MemoryHashTransport::new());
    let store = hash_store(&transport, Tier::Prod, DataCenter::East);

    store
        .set_override("app", "TopInteger", "1", DataCenter::Any, "alice", SetOverrideOptions::new())
        .unwrap();
    let saved = store.get_snapshot("app").unwrap();

    store
        .set_override("app", "TopInteger", "2", DataCenter::Any, "alice", SetOverrideOptions::new())
        .unwrap();
    store
        .set_override("app", "C", "30", DataCenter::Any, "alice", SetOverrideOptions::new())
        .unwrap();

    store
        .restore_snapshot("app", &saved, "bob", RestoreOptions::new())
        .unwrap()
        .unwrap();

    let settings = store.get_settings("app").unwrap().settings;
    assert_eq!(settings.top_integer, 1);
    assert_eq!(settings.c, 2);

    // The stale field was deleted at the transport level, not just masked.
    let fields = transport.get_all("app").unwrap();
    assert!(!fields.iter().any(|(f, _)| f == ":3:0;C"));
}
