//! Settings schema
//!
//! The schema is the product of the one-time binding walk: the ordered
//! setting list, the instance factory, and the optional encryptor. One
//! schema is built per settings struct per process and shared by every
//! store and app that uses that struct.

mod binder;
mod setting;

pub use binder::{CipherDefault, DefaultSpec, EncryptedDecl, GroupDefault, SchemaBinder, Scope, SettingDecl};
pub use setting::{DefaultValue, Setting};

use crate::axes::{DataCenterAxis, TierAxis};
use crate::by_setting::{BySetting, ListBySetting};
use crate::crypto::SettingsEncryptor;
use crate::error::Result;
use std::sync::Arc;

/// A struct whose fields can be bound as settings and nested groups.
///
/// Usually generated by `#[derive(SettingsGroup)]` (feature `derive`);
/// implement manually to use the registration DSL directly. The same impl
/// serves as a root settings struct and as a nested group.
pub trait SettingsGroup<T: TierAxis, D: DataCenterAxis>:
    Default + Send + Sync + Sized + 'static
{
    /// Declare this struct's settings and groups on `scope`.
    fn bind_group<R: Default + Send + Sync + 'static>(scope: &mut Scope<'_, R, Self, T, D>);
}

type Factory<S> = Arc<dyn Fn() -> S + Send + Sync>;

/// The bound schema of one settings struct.
pub struct Schema<S, T: TierAxis, D: DataCenterAxis> {
    settings: BySetting<Setting<S, T, D>>,
    factory: Factory<S>,
    encryptor: Option<Arc<dyn SettingsEncryptor>>,
}

impl<S, T: TierAxis, D: DataCenterAxis> Schema<S, T, D>
where
    S: Default + Send + Sync + 'static,
{
    pub(crate) fn new(
        settings: BySetting<Setting<S, T, D>>,
        factory: Factory<S>,
        encryptor: Option<Arc<dyn SettingsEncryptor>>,
    ) -> Self {
        Self {
            settings,
            factory,
            encryptor,
        }
    }

    /// Bind a [`SettingsGroup`] struct with no encryptor.
    ///
    /// # Errors
    ///
    /// Propagates the binding failures of
    /// [`SchemaBinder::finish`](SchemaBinder::finish).
    pub fn bind() -> Result<Self>
    where
        S: SettingsGroup<T, D>,
    {
        SchemaBinder::new().bind(S::bind_group).finish()
    }

    /// Bind a [`SettingsGroup`] struct with an encryptor for its encrypted
    /// settings.
    ///
    /// # Errors
    ///
    /// Propagates the binding failures of
    /// [`SchemaBinder::finish`](SchemaBinder::finish).
    pub fn bind_with_encryptor(encryptor: Arc<dyn SettingsEncryptor>) -> Result<Self>
    where
        S: SettingsGroup<T, D>,
    {
        SchemaBinder::new()
            .with_encryptor(encryptor)
            .bind(S::bind_group)
            .finish()
    }

    /// All settings, sorted by name.
    pub fn settings(&self) -> impl Iterator<Item = &Setting<S, T, D>> {
        self.settings.iter()
    }

    /// Number of bound settings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.settings.len()
    }

    /// Whether the schema binds no settings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// Look up one setting by dotted name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Setting<S, T, D>> {
        self.settings.get(name)
    }

    /// Construct a fresh instance holding every type's zero values, groups
    /// included, before any defaults or overrides are applied.
    #[must_use]
    pub fn build_instance(&self) -> S {
        (self.factory)()
    }

    /// The effective defaults table for an evaluation pair: a declaration
    /// is kept iff its sub-app is unset or equal, and its tier is `Any` or
    /// equal.
    #[must_use]
    pub fn defaults_for(&self, tier: T, sub_app_id: Option<i32>) -> ListBySetting<DefaultValue<T, D>> {
        let kept = self
            .settings
            .iter()
            .flat_map(|s| s.defaults.iter())
            .filter(|d| d.is_kept_for(tier, sub_app_id))
            .cloned()
            .collect();
        ListBySetting::new(kept)
    }

    /// The encryptor backing encrypted settings, when configured.
    #[must_use]
    pub fn encryptor(&self) -> Option<&Arc<dyn SettingsEncryptor>> {
        self.encryptor.as_ref()
    }

    /// Whether any setting is encrypted.
    #[must_use]
    pub fn has_encrypted_settings(&self) -> bool {
        self.settings.iter().any(Setting::is_encrypted)
    }
}

impl<S, T: TierAxis, D: DataCenterAxis> std::fmt::Debug for Schema<S, T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("settings", &self.settings.len())
            .field("has_encryptor", &self.encryptor.is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{FromStrConverter, SettingConverter};
    use crate::error::Error;
    use std::sync::Arc;

    crate::axis_enum! {
        tier enum Tier { Any, Local, Dev, Prod }
    }

    crate::axis_enum! {
        data_center enum Dc { Any, East, West, Oregon }
    }

    #[derive(Default)]
    struct Nested {
        integer: i32,
    }

    #[derive(Default)]
    struct Root {
        top_integer: i32,
        greeting: String,
        nested: Nested,
    }

    fn bind_root() -> Schema<Root, Tier, Dc> {
        SchemaBinder::new()
            .bind(|root| {
                root.setting("TopInteger", |s: &mut Root, v: i32| s.top_integer = v)
                    .description("An integer at the root")
                    .default(23);
                root.setting("Greeting", |s: &mut Root, v: String| s.greeting = v)
                    .default("hello".to_string())
                    .tier_default(Tier::Prod, "hello, production".to_string());
                root.group("Nested", |s: &mut Root| &mut s.nested, |g| {
                    g.setting("Integer", |n: &mut Nested, v: i32| n.integer = v)
                        .default(17)
                        .tier_default(Tier::Prod, 7);
                });
            })
            .finish()
            .unwrap()
    }

    #[test]
    fn test_settings_sorted_by_name() {
        let schema = bind_root();
        let names: Vec<&str> = schema.settings().map(Setting::name).collect();
        assert_eq!(names, vec!["Greeting", "Nested.Integer", "TopInteger"]);
    }

    #[test]
    fn test_apply_walks_groups() {
        let schema = bind_root();
        let mut instance = schema.build_instance();

        schema
            .get("Nested.Integer")
            .unwrap()
            .apply(&mut instance, "41")
            .unwrap();
        assert_eq!(instance.nested.integer, 41);

        let err = schema
            .get("TopInteger")
            .unwrap()
            .apply(&mut instance, "not a number")
            .unwrap_err();
        assert!(matches!(err, Error::Conversion { .. }));
    }

    #[test]
    fn test_defaults_table_filter() {
        let schema = bind_root();

        let local = schema.defaults_for(Tier::Local, None);
        assert_eq!(local.get_all("Nested.Integer").len(), 1);
        assert_eq!(local.get_all("Nested.Integer")[0].value, "17");

        let prod = schema.defaults_for(Tier::Prod, None);
        let values: Vec<&str> = prod
            .get_all("Nested.Integer")
            .iter()
            .map(|d| d.value.as_str())
            .collect();
        assert_eq!(values, vec!["17", "7"]);
    }

    #[test]
    fn test_duplicate_name_is_fatal() {
        let result = SchemaBinder::<Root, Tier, Dc>::new()
            .bind(|root| {
                root.setting("X", |s: &mut Root, v: i32| s.top_integer = v)
                    .default(1);
                root.setting("X", |s: &mut Root, v: i32| s.top_integer = v)
                    .default(2);
            })
            .finish();
        assert!(matches!(result, Err(Error::DuplicateSetting(name)) if name == "X"));
    }

    #[test]
    fn test_missing_root_default_is_fatal() {
        let result = SchemaBinder::<Root, Tier, Dc>::new()
            .bind(|root| {
                root.setting("OnlyTiered", |s: &mut Root, v: i32| s.top_integer = v)
                    .tier_default(Tier::Prod, 5);
            })
            .finish();
        assert!(matches!(result, Err(Error::MissingRootDefault { setting }) if setting == "OnlyTiered"));
    }

    #[test]
    fn test_duplicate_default_tuple_is_fatal() {
        let result = SchemaBinder::<Root, Tier, Dc>::new()
            .bind(|root| {
                root.setting("X", |s: &mut Root, v: i32| s.top_integer = v)
                    .default(1)
                    .with_default(DefaultSpec::new(2));
            })
            .finish();
        assert!(matches!(result, Err(Error::DuplicateDefault { setting }) if setting == "X"));
    }

    #[test]
    fn test_double_converter_is_fatal() {
        let result = SchemaBinder::<Root, Tier, Dc>::new()
            .bind(|root| {
                root.setting("X", |s: &mut Root, v: i32| s.top_integer = v)
                    .converter(Arc::new(FromStrConverter::default()))
                    .converter(Arc::new(FromStrConverter::default()))
                    .default(1);
            })
            .finish();
        assert!(matches!(result, Err(Error::MultipleConverters { setting }) if setting == "X"));
    }

    #[test]
    fn test_group_converter_inheritance() {
        struct Doubling;
        impl SettingConverter<i32> for Doubling {
            fn stringify(&self, value: &i32) -> String {
                (value / 2).to_string()
            }
            fn parse(&self, raw: &str) -> crate::Result<i32> {
                FromStrConverter::<i32>::default().parse(raw).map(|v| v * 2)
            }
        }

        let schema = SchemaBinder::<Root, Tier, Dc>::new()
            .bind(|root| {
                root.group("Nested", |s: &mut Root| &mut s.nested, |g| {
                    g.converter_for::<i32>(Arc::new(Doubling));
                    g.setting("Integer", |n: &mut Nested, v: i32| n.integer = v)
                        .default(10);
                });
                root.setting("TopInteger", |s: &mut Root, v: i32| s.top_integer = v)
                    .default(10);
            })
            .finish()
            .unwrap();

        // Group converter applies inside the group, built-in outside it.
        assert_eq!(schema.get("Nested.Integer").unwrap().defaults()[0].value, "5");
        assert_eq!(schema.get("TopInteger").unwrap().defaults()[0].value, "10");

        let mut instance = schema.build_instance();
        schema
            .get("Nested.Integer")
            .unwrap()
            .apply(&mut instance, "5")
            .unwrap();
        assert_eq!(instance.nested.integer, 10);
    }

    #[test]
    fn test_setting_with_explicit_converter_for_foreign_type() {
        // A type with no FromStr/Display impls can still be a setting when
        // a converter is attached at declaration.
        #[derive(Default, PartialEq, Debug)]
        struct Endpoints(Vec<String>);

        struct CommaSeparated;
        impl SettingConverter<Endpoints> for CommaSeparated {
            fn stringify(&self, value: &Endpoints) -> String {
                value.0.join(",")
            }
            fn parse(&self, raw: &str) -> crate::Result<Endpoints> {
                if raw.is_empty() {
                    return Ok(Endpoints(Vec::new()));
                }
                Ok(Endpoints(raw.split(',').map(str::to_string).collect()))
            }
        }

        #[derive(Default)]
        struct WithEndpoints {
            endpoints: Endpoints,
        }

        let schema = SchemaBinder::<WithEndpoints, Tier, Dc>::new()
            .bind(|root| {
                root.setting_with(
                    "Endpoints",
                    Arc::new(CommaSeparated),
                    |s: &mut WithEndpoints, v: Endpoints| s.endpoints = v,
                )
                .default(Endpoints(vec!["a:1".into(), "b:2".into()]));
            })
            .finish()
            .unwrap();

        assert_eq!(schema.get("Endpoints").unwrap().defaults()[0].value, "a:1,b:2");

        let mut instance = schema.build_instance();
        schema
            .get("Endpoints")
            .unwrap()
            .apply(&mut instance, "x:9")
            .unwrap();
        assert_eq!(instance.endpoints, Endpoints(vec!["x:9".into()]));
    }

    #[test]
    fn test_group_defaults_fill_gaps() {
        let schema = SchemaBinder::<Root, Tier, Dc>::new()
            .bind(|root| {
                root.group("Nested", |s: &mut Root| &mut s.nested, |g| {
                    g.group_default(GroupDefault::new("100").tier(Tier::Prod));
                    g.setting("Integer", |n: &mut Nested, v: i32| n.integer = v)
                        .default(17);
                });
            })
            .finish()
            .unwrap();

        let defaults = schema.get("Nested.Integer").unwrap().defaults();
        assert_eq!(defaults.len(), 2);
        assert_eq!(defaults[1].tier, Tier::Prod);
        assert_eq!(defaults[1].value, "100");
    }

    #[test]
    fn test_group_default_does_not_shadow_declared_tuple() {
        let schema = SchemaBinder::<Root, Tier, Dc>::new()
            .bind(|root| {
                root.group("Nested", |s: &mut Root| &mut s.nested, |g| {
                    g.group_default(GroupDefault::new("100").tier(Tier::Prod));
                    g.setting("Integer", |n: &mut Nested, v: i32| n.integer = v)
                        .default(17)
                        .tier_default(Tier::Prod, 7);
                });
            })
            .finish()
            .unwrap();

        let values: Vec<&str> = schema
            .get("Nested.Integer")
            .unwrap()
            .defaults()
            .iter()
            .map(|d| d.value.as_str())
            .collect();
        assert_eq!(values, vec!["17", "7"]);
    }

    #[test]
    fn test_group_default_must_parse() {
        let result = SchemaBinder::<Root, Tier, Dc>::new()
            .bind(|root| {
                root.group("Nested", |s: &mut Root| &mut s.nested, |g| {
                    g.group_default(GroupDefault::new("not a number").tier(Tier::Prod));
                    g.setting("Integer", |n: &mut Nested, v: i32| n.integer = v)
                        .default(17);
                });
            })
            .finish();
        assert!(matches!(result, Err(Error::InvalidDefault { .. })));
    }

    #[cfg(feature = "encryption")]
    mod encrypted {
        use super::*;
        use crate::crypto::{AesGcmEncryptor, SettingsEncryptor};

        fn encryptor() -> Arc<AesGcmEncryptor> {
            Arc::new(AesGcmEncryptor::new(&AesGcmEncryptor::generate_key()).unwrap())
        }

        #[test]
        fn test_encrypted_setting_gets_implicit_zero_default() {
            let schema = SchemaBinder::<Root, Tier, Dc>::new()
                .with_encryptor(encryptor())
                .bind(|root| {
                    root.encrypted_setting("Secret", |s: &mut Root, v: String| s.greeting = v);
                })
                .finish()
                .unwrap();

            let defaults = schema.get("Secret").unwrap().defaults();
            assert_eq!(defaults.len(), 1);
            assert!(defaults[0].is_unconditional());
            assert_eq!(defaults[0].value, "");
        }

        #[test]
        fn test_encrypted_unconditional_default_is_fatal() {
            let enc = encryptor();
            let cipher = enc.encrypt("top secret").unwrap();
            let result = SchemaBinder::<Root, Tier, Dc>::new()
                .with_encryptor(enc)
                .bind(|root| {
                    root.encrypted_setting("Secret", |s: &mut Root, v: String| s.greeting = v)
                        .cipher_default(CipherDefault::new(cipher));
                })
                .finish();
            assert!(matches!(result, Err(Error::EncryptedDefault { setting }) if setting == "Secret"));
        }

        #[test]
        fn test_encrypted_tier_default_must_decrypt() {
            let result = SchemaBinder::<Root, Tier, Dc>::new()
                .with_encryptor(encryptor())
                .bind(|root| {
                    root.encrypted_setting("Secret", |s: &mut Root, v: String| s.greeting = v)
                        .cipher_default(CipherDefault::new("not a ciphertext").tier(Tier::Prod));
                })
                .finish();
            assert!(matches!(result, Err(Error::InvalidDefault { .. })));
        }

        #[test]
        fn test_encrypted_requires_encryptor() {
            let result = SchemaBinder::<Root, Tier, Dc>::new()
                .bind(|root| {
                    root.encrypted_setting("Secret", |s: &mut Root, v: String| s.greeting = v);
                })
                .finish();
            assert!(matches!(result, Err(Error::InvalidEncryptor(_))));
        }
    }
}
