//! Encrypted settings integration tests (requires the `encryption` feature)

mod common;

use common::{DataCenter, Tier};
use nfig::{
    AesGcmEncryptor, CipherDefault, Error, SchemaBinder, SetOverrideOptions, SettingsEncryptor,
    SettingsStore, Snapshot,
};
use std::sync::Arc;

#[derive(Debug, Default)]
struct SecretSettings {
    api_key: String,
    token_budget: i32,
    label: String,
}

fn encryptor() -> Arc<AesGcmEncryptor> {
    Arc::new(AesGcmEncryptor::new(&AesGcmEncryptor::generate_key()).unwrap())
}

fn build(
    encryptor: &Arc<AesGcmEncryptor>,
) -> Arc<nfig::Schema<SecretSettings, Tier, DataCenter>> {
    let prod_key = encryptor.encrypt("prod-api-key").unwrap();
    let schema = SchemaBinder::new()
        .with_encryptor(Arc::clone(encryptor) as Arc<dyn SettingsEncryptor>)
        .bind(|root| {
            root.encrypted_setting("ApiKey", |s: &mut SecretSettings, v: String| s.api_key = v)
                .description("Upstream API key")
                .cipher_default(CipherDefault::new(prod_key.clone()).tier(Tier::Prod));
            root.encrypted_setting("TokenBudget", |s: &mut SecretSettings, v: i32| {
                s.token_budget = v;
            });
            root.setting("Label", |s: &mut SecretSettings, v: String| s.label = v)
                .default("plain".to_string());
        })
        .finish()
        .unwrap();
    Arc::new(schema)
}

#[test]
fn test_zero_default_and_cipher_default() {
    let enc = encryptor();
    let schema = build(&enc);

    // No declared default applies on Local: the implicit zero stands.
    let local = SettingsStore::in_memory(Arc::clone(&schema), Tier::Local, DataCenter::East).unwrap();
    let settings = local.get_settings("app").unwrap().settings;
    assert_eq!(settings.api_key, "");
    assert_eq!(settings.token_budget, 0);

    // The Prod cipher default materializes as plaintext.
    let prod = SettingsStore::in_memory(schema, Tier::Prod, DataCenter::East).unwrap();
    let resolved = prod.get_settings("app").unwrap();
    assert_eq!(resolved.settings.api_key, "prod-api-key");
    assert!(resolved.is_clean());
}

#[test]
fn test_override_round_trip_keeps_ciphertext_at_rest() {
    let enc = encryptor();
    let schema = build(&enc);
    let store = SettingsStore::in_memory(schema, Tier::Prod, DataCenter::East).unwrap();

    let ciphertext = enc.encrypt("override-key").unwrap();
    store
        .set_override("app", "ApiKey", &ciphertext, DataCenter::Any, "alice", SetOverrideOptions::new())
        .unwrap()
        .unwrap();

    // Materialized: plaintext.
    assert_eq!(store.get_settings("app").unwrap().settings.api_key, "override-key");

    // At rest and on the wire: ciphertext only.
    let snapshot = store.get_snapshot("app").unwrap();
    assert_eq!(snapshot.overrides.get_all("ApiKey")[0].value, ciphertext);
    let json = serde_json::to_string(&snapshot).unwrap();
    assert!(!json.contains("override-key"));
    assert!(json.contains(&ciphertext));

    // The event value is the ciphertext as well.
    let parsed: Snapshot<DataCenter> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.last_event.unwrap().value.as_deref(), Some(ciphertext.as_str()));
}

#[test]
fn test_typed_encrypted_setting_parses_plaintext() {
    let enc = encryptor();
    let schema = build(&enc);
    let store = SettingsStore::in_memory(schema, Tier::Prod, DataCenter::East).unwrap();

    let good = enc.encrypt("42").unwrap();
    store
        .set_override("app", "TokenBudget", &good, DataCenter::Any, "alice", SetOverrideOptions::new())
        .unwrap()
        .unwrap();
    assert_eq!(store.get_settings("app").unwrap().settings.token_budget, 42);

    // Decrypts, but the plaintext does not parse as an integer.
    let bad = enc.encrypt("not a number").unwrap();
    let err = store
        .set_override("app", "TokenBudget", &bad, DataCenter::Any, "alice", SetOverrideOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOverrideValue { setting, .. } if setting == "TokenBudget"));
}

#[test]
fn test_plaintext_value_rejected_for_encrypted_setting() {
    let enc = encryptor();
    let schema = build(&enc);
    let store = SettingsStore::in_memory(schema, Tier::Prod, DataCenter::East).unwrap();

    let err = store
        .set_override("app", "ApiKey", "raw plaintext", DataCenter::Any, "alice", SetOverrideOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOverrideValue { setting, .. } if setting == "ApiKey"));

    // Plain settings are unaffected by the encryptor.
    store
        .set_override("app", "Label", "visible", DataCenter::Any, "alice", SetOverrideOptions::new())
        .unwrap()
        .unwrap();
    assert_eq!(store.get_settings("app").unwrap().settings.label, "visible");
}

#[test]
fn test_wrong_key_override_diagnosed_at_resolve() {
    // An override written under one key no longer decrypts after the store
    // is rebuilt with another key: the resolver reports it and falls back.
    let enc1 = encryptor();
    let schema1 = build(&enc1);
    let store1 = SettingsStore::in_memory(schema1, Tier::Prod, DataCenter::East).unwrap();
    let ciphertext = enc1.encrypt("old-secret").unwrap();
    store1
        .set_override("app", "ApiKey", &ciphertext, DataCenter::Any, "alice", SetOverrideOptions::new())
        .unwrap();
    let snapshot = store1.get_snapshot("app").unwrap();

    let enc2 = encryptor();
    let schema2 = build(&enc2);
    let defaults = schema2.defaults_for(Tier::Prod, None);
    let ctx = nfig::EvaluationContext::new(Tier::Prod, DataCenter::East).unwrap();
    let resolved = nfig::resolve(
        &schema2,
        &defaults,
        &snapshot,
        &ctx,
        time::OffsetDateTime::now_utc(),
    );

    // Falls back to the (new) cipher default, which does decrypt.
    assert_eq!(resolved.settings.api_key, "prod-api-key");
    assert_eq!(resolved.invalid_overrides.len(), 1);
    assert_eq!(resolved.invalid_overrides[0].setting_name, "ApiKey");
}
