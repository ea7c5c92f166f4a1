//! Schema binding
//!
//! [`SchemaBinder`] performs the one-time walk over a settings struct. The
//! walk is expressed as a registration DSL: each leaf is declared with a
//! dotted name and an assignment closure, nested groups are entered with a
//! projection closure, and every declaration chain produces the flat
//! contract the resolver consumes — `(name, setter, converter, defaults)`.
//! The derive macro in `nfig-derive` generates these calls from a struct
//! definition.
//!
//! Converters declared on a scope apply to settings declared after them in
//! that scope and its children. Group-level defaults are applied when the
//! scope closes, so their position inside the group does not matter.

use crate::axes::{DataCenterAxis, TierAxis};
use crate::by_setting::BySetting;
use crate::convert::{ConvertibleValue, SettingConverter};
use crate::crypto::{SettingsEncryptor, validate_encryptor};
use crate::error::Error;
use crate::schema::Schema;
use crate::schema::setting::{ApplyFn, DefaultValue, ParseCheckFn, Setting};
use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::Arc;

type ConverterMap = std::collections::HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// A typed default declaration for one setting.
#[derive(Clone, Debug)]
pub struct DefaultSpec<T: TierAxis, D: DataCenterAxis, V> {
    value: V,
    sub_app_id: Option<i32>,
    tier: T,
    data_center: D,
    allows_overrides: bool,
}

impl<T: TierAxis, D: DataCenterAxis, V> DefaultSpec<T, D, V> {
    /// An unconditional default: no sub-app, `Any` tier, `Any` data center,
    /// overridable.
    pub fn new(value: V) -> Self {
        Self {
            value,
            sub_app_id: None,
            tier: T::ANY,
            data_center: D::ANY,
            allows_overrides: true,
        }
    }

    /// Scope the default to a tier.
    #[must_use]
    pub fn tier(mut self, tier: T) -> Self {
        self.tier = tier;
        self
    }

    /// Scope the default to a data center.
    #[must_use]
    pub fn data_center(mut self, data_center: D) -> Self {
        self.data_center = data_center;
        self
    }

    /// Scope the default to a sub-app.
    #[must_use]
    pub fn sub_app(mut self, sub_app_id: i32) -> Self {
        self.sub_app_id = Some(sub_app_id);
        self
    }

    /// Forbid overrides wherever this default wins.
    #[must_use]
    pub fn no_overrides(mut self) -> Self {
        self.allows_overrides = false;
        self
    }
}

/// A ciphertext default declaration for an encrypted setting.
///
/// Must be scoped: an unconditional tuple is reserved for the implicit zero
/// default.
#[derive(Clone, Debug)]
pub struct CipherDefault<T: TierAxis, D: DataCenterAxis> {
    ciphertext: String,
    sub_app_id: Option<i32>,
    tier: T,
    data_center: D,
    allows_overrides: bool,
}

impl<T: TierAxis, D: DataCenterAxis> CipherDefault<T, D> {
    pub fn new(ciphertext: impl Into<String>) -> Self {
        Self {
            ciphertext: ciphertext.into(),
            sub_app_id: None,
            tier: T::ANY,
            data_center: D::ANY,
            allows_overrides: true,
        }
    }

    /// Scope the default to a tier.
    #[must_use]
    pub fn tier(mut self, tier: T) -> Self {
        self.tier = tier;
        self
    }

    /// Scope the default to a data center.
    #[must_use]
    pub fn data_center(mut self, data_center: D) -> Self {
        self.data_center = data_center;
        self
    }

    /// Scope the default to a sub-app.
    #[must_use]
    pub fn sub_app(mut self, sub_app_id: i32) -> Self {
        self.sub_app_id = Some(sub_app_id);
        self
    }

    /// Forbid overrides wherever this default wins.
    #[must_use]
    pub fn no_overrides(mut self) -> Self {
        self.allows_overrides = false;
        self
    }
}

/// A string-valued default declared on a group.
///
/// Applied when the group's scope closes, to every setting declared within
/// it that lacks a declaration with the same `(sub-app, tier, data-center)`
/// tuple. The value is validated against each receiving setting's
/// converter.
#[derive(Clone, Debug)]
pub struct GroupDefault<T: TierAxis, D: DataCenterAxis> {
    value: String,
    sub_app_id: Option<i32>,
    tier: T,
    data_center: D,
    allows_overrides: bool,
}

impl<T: TierAxis, D: DataCenterAxis> GroupDefault<T, D> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            sub_app_id: None,
            tier: T::ANY,
            data_center: D::ANY,
            allows_overrides: true,
        }
    }

    /// Scope the default to a tier.
    #[must_use]
    pub fn tier(mut self, tier: T) -> Self {
        self.tier = tier;
        self
    }

    /// Scope the default to a data center.
    #[must_use]
    pub fn data_center(mut self, data_center: D) -> Self {
        self.data_center = data_center;
        self
    }

    /// Scope the default to a sub-app.
    #[must_use]
    pub fn sub_app(mut self, sub_app_id: i32) -> Self {
        self.sub_app_id = Some(sub_app_id);
        self
    }

    /// Forbid overrides wherever this default wins.
    #[must_use]
    pub fn no_overrides(mut self) -> Self {
        self.allows_overrides = false;
        self
    }
}

/// One-time builder producing a [`Schema`].
pub struct SchemaBinder<S, T: TierAxis, D: DataCenterAxis>
where
    S: Default + Send + Sync + 'static,
{
    settings: Vec<Setting<S, T, D>>,
    names: HashSet<String>,
    errors: Vec<Error>,
    encryptor: Option<Arc<dyn SettingsEncryptor>>,
    saw_encrypted: bool,
}

impl<S, T: TierAxis, D: DataCenterAxis> SchemaBinder<S, T, D>
where
    S: Default + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: Vec::new(),
            names: HashSet::new(),
            errors: Vec::new(),
            encryptor: None,
            saw_encrypted: false,
        }
    }

    /// Attach the encryptor backing this schema's encrypted settings.
    ///
    /// The encryptor is probe-validated immediately; a failing round-trip
    /// surfaces as [`Error::InvalidEncryptor`] from [`finish`](Self::finish).
    #[must_use]
    pub fn with_encryptor(mut self, encryptor: Arc<dyn SettingsEncryptor>) -> Self {
        if let Err(e) = validate_encryptor(encryptor.as_ref()) {
            self.errors.push(e);
        }
        self.encryptor = Some(encryptor);
        self
    }

    /// Run declarations against the root scope.
    #[must_use]
    pub fn bind(mut self, f: impl FnOnce(&mut Scope<'_, S, S, T, D>)) -> Self {
        let mut scope = Scope {
            binder: &mut self,
            prefix: String::new(),
            project: Arc::new(|root: &mut S| root),
            inherited: Vec::new(),
            own_converters: ConverterMap::new(),
            group_defaults: Vec::new(),
            start_index: 0,
        };
        f(&mut scope);
        drop(scope);
        self
    }

    /// Validate the collected declarations and produce the schema.
    ///
    /// # Errors
    ///
    /// The binding failures: duplicate names, duplicate default
    /// tuples, multiple converters on one setting, invalid default values,
    /// a missing unconditional default, a forbidden encrypted default, or a
    /// missing/invalid encryptor.
    pub fn finish(mut self) -> crate::Result<Schema<S, T, D>> {
        if let Some(err) = self.errors.drain(..).next() {
            return Err(err);
        }

        if self.saw_encrypted && self.encryptor.is_none() {
            return Err(Error::InvalidEncryptor(
                "schema declares encrypted settings but no encryptor is configured".into(),
            ));
        }

        for setting in &self.settings {
            if !setting.is_encrypted && !setting.defaults.iter().any(DefaultValue::is_unconditional)
            {
                return Err(Error::MissingRootDefault {
                    setting: setting.name.clone(),
                });
            }
        }

        let settings = BySetting::new(std::mem::take(&mut self.settings))?;
        Ok(Schema::new(settings, Arc::new(S::default), self.encryptor))
    }
}

impl<S, T: TierAxis, D: DataCenterAxis> Default for SchemaBinder<S, T, D>
where
    S: Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

type Projection<R, G> = Arc<dyn Fn(&mut R) -> &mut G + Send + Sync>;

/// A binding scope: the root of the settings struct, or a nested group
/// entered through a projection.
pub struct Scope<'a, R, G: 'static, T: TierAxis, D: DataCenterAxis>
where
    R: Default + Send + Sync + 'static,
{
    binder: &'a mut SchemaBinder<R, T, D>,
    prefix: String,
    project: Projection<R, G>,
    /// Converter maps of enclosing groups, outermost first.
    inherited: Vec<Arc<ConverterMap>>,
    own_converters: ConverterMap,
    group_defaults: Vec<GroupDefault<T, D>>,
    start_index: usize,
}

impl<'a, R, G: 'static, T: TierAxis, D: DataCenterAxis> Scope<'a, R, G, T, D>
where
    R: Default + Send + Sync + 'static,
{
    /// Declare a setting of type `V`, assigned through `assign`.
    ///
    /// The returned declaration finalizes when dropped, i.e. at the end of
    /// the statement.
    pub fn setting<V: ConvertibleValue>(
        &mut self,
        name: &str,
        assign: impl Fn(&mut G, V) + Send + Sync + 'static,
    ) -> SettingDecl<'_, 'a, R, G, T, D, V> {
        SettingDecl {
            scope: self,
            name: name.to_string(),
            assign: Some(Box::new(assign)),
            converter: None,
            builtin: Some(V::default_converter()),
            converter_conflict: false,
            description: String::new(),
            requires_restart: false,
            defaults: Vec::new(),
        }
    }

    /// Declare a setting whose type has no built-in converter, attaching
    /// one explicitly.
    pub fn setting_with<V: Send + Sync + 'static>(
        &mut self,
        name: &str,
        converter: Arc<dyn SettingConverter<V>>,
        assign: impl Fn(&mut G, V) + Send + Sync + 'static,
    ) -> SettingDecl<'_, 'a, R, G, T, D, V> {
        SettingDecl {
            scope: self,
            name: name.to_string(),
            assign: Some(Box::new(assign)),
            converter: Some(converter),
            builtin: None,
            converter_conflict: false,
            description: String::new(),
            requires_restart: false,
            defaults: Vec::new(),
        }
    }

    /// Declare an encrypted setting of type `V`.
    ///
    /// Stored values (defaults and overrides) are ciphertext; the implicit
    /// unconditional default is the type's zero value, i.e. whatever the
    /// instance factory put there.
    pub fn encrypted_setting<V: ConvertibleValue>(
        &mut self,
        name: &str,
        assign: impl Fn(&mut G, V) + Send + Sync + 'static,
    ) -> EncryptedDecl<'_, 'a, R, G, T, D, V> {
        EncryptedDecl {
            scope: self,
            name: name.to_string(),
            assign: Some(Box::new(assign)),
            converter: None,
            builtin: Some(V::default_converter()),
            converter_conflict: false,
            description: String::new(),
            requires_restart: false,
            defaults: Vec::new(),
        }
    }

    /// Declare an encrypted setting with an explicit converter.
    pub fn encrypted_setting_with<V: Send + Sync + 'static>(
        &mut self,
        name: &str,
        converter: Arc<dyn SettingConverter<V>>,
        assign: impl Fn(&mut G, V) + Send + Sync + 'static,
    ) -> EncryptedDecl<'_, 'a, R, G, T, D, V> {
        EncryptedDecl {
            scope: self,
            name: name.to_string(),
            assign: Some(Box::new(assign)),
            converter: Some(converter),
            builtin: None,
            converter_conflict: false,
            description: String::new(),
            requires_restart: false,
            defaults: Vec::new(),
        }
    }

    /// Enter a nested group. Settings declared inside are prefixed with
    /// `<name>.` and assigned through `project`.
    pub fn group<G2: 'static>(
        &mut self,
        name: &str,
        project: impl Fn(&mut G) -> &mut G2 + Send + Sync + 'static,
        f: impl FnOnce(&mut Scope<'_, R, G2, T, D>),
    ) {
        let parent_project = Arc::clone(&self.project);
        let mut inherited = self.inherited.clone();
        inherited.push(Arc::new(self.own_converters.clone()));

        let mut child = Scope {
            binder: &mut *self.binder,
            prefix: format!("{}{}.", self.prefix, name),
            project: Arc::new(move |root: &mut R| project(parent_project(root))),
            inherited,
            own_converters: ConverterMap::new(),
            group_defaults: Vec::new(),
            start_index: 0,
        };
        child.start_index = child.binder.settings.len();
        f(&mut child);
    }

    /// Register a converter for every `V`-typed setting declared after this
    /// point in this scope and its nested groups.
    pub fn converter_for<V: 'static>(&mut self, converter: Arc<dyn SettingConverter<V>>) {
        self.own_converters
            .insert(TypeId::of::<V>(), Arc::new(converter));
    }

    /// Declare a group-level default, applied at scope close to every
    /// setting in this scope (and nested groups) that lacks a declaration
    /// with the same `(sub-app, tier, data-center)` tuple.
    pub fn group_default(&mut self, default: GroupDefault<T, D>) {
        self.group_defaults.push(default);
    }

    fn lookup_converter<V: 'static>(&self) -> Option<Arc<dyn SettingConverter<V>>> {
        fn get<V: 'static>(map: &ConverterMap) -> Option<Arc<dyn SettingConverter<V>>> {
            map.get(&TypeId::of::<V>())
                .and_then(|any| any.downcast_ref::<Arc<dyn SettingConverter<V>>>())
                .cloned()
        }

        if let Some(found) = get::<V>(&self.own_converters) {
            return Some(found);
        }
        // Walk enclosing groups outward.
        self.inherited.iter().rev().find_map(|map| get::<V>(map))
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_plain<V: Send + Sync + 'static>(
        &mut self,
        name: String,
        assign: Box<dyn Fn(&mut G, V) + Send + Sync>,
        explicit: Option<Arc<dyn SettingConverter<V>>>,
        builtin: Option<Arc<dyn SettingConverter<V>>>,
        conflict: bool,
        description: String,
        requires_restart: bool,
        specs: Vec<DefaultSpec<T, D, V>>,
    ) {
        let full_name = format!("{}{}", self.prefix, name);
        if conflict {
            self.binder.errors.push(Error::MultipleConverters {
                setting: full_name,
            });
            return;
        }
        if !self.binder.names.insert(full_name.clone()) {
            self.binder.errors.push(Error::DuplicateSetting(full_name));
            return;
        }

        let resolved = explicit.or_else(|| self.lookup_converter::<V>()).or(builtin);
        let Some(converter) = resolved else {
            self.binder.errors.push(Error::UnknownConverter {
                setting: full_name,
                type_name: std::any::type_name::<V>(),
            });
            return;
        };

        let mut defaults: Vec<DefaultValue<T, D>> = Vec::with_capacity(specs.len());
        for spec in specs {
            let value = converter.stringify(&spec.value);
            if let Err(e) = converter.parse(&value) {
                self.binder.errors.push(Error::InvalidDefault {
                    setting: full_name.clone(),
                    reason: format!("does not survive stringify/parse: {e}"),
                });
                return;
            }
            let default = DefaultValue {
                name: full_name.clone(),
                value,
                sub_app_id: spec.sub_app_id,
                tier: spec.tier,
                data_center: spec.data_center,
                allows_overrides: spec.allows_overrides,
            };
            if defaults.iter().any(|d| d.same_tuple(&default)) {
                self.binder.errors.push(Error::DuplicateDefault {
                    setting: full_name,
                });
                return;
            }
            defaults.push(default);
        }

        self.push_setting(full_name, converter, assign, defaults, SettingMeta {
            description,
            requires_restart,
            encrypted: false,
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_encrypted<V: Send + Sync + 'static>(
        &mut self,
        name: String,
        assign: Box<dyn Fn(&mut G, V) + Send + Sync>,
        explicit: Option<Arc<dyn SettingConverter<V>>>,
        builtin: Option<Arc<dyn SettingConverter<V>>>,
        conflict: bool,
        description: String,
        requires_restart: bool,
        specs: Vec<CipherDefault<T, D>>,
    ) {
        let full_name = format!("{}{}", self.prefix, name);
        if conflict {
            self.binder.errors.push(Error::MultipleConverters {
                setting: full_name,
            });
            return;
        }
        if !self.binder.names.insert(full_name.clone()) {
            self.binder.errors.push(Error::DuplicateSetting(full_name));
            return;
        }

        let resolved = explicit.or_else(|| self.lookup_converter::<V>()).or(builtin);
        let Some(converter) = resolved else {
            self.binder.errors.push(Error::UnknownConverter {
                setting: full_name,
                type_name: std::any::type_name::<V>(),
            });
            return;
        };

        // Implicit zero default: the factory value stands in, nothing is
        // decrypted or assigned when it wins.
        let mut defaults = vec![DefaultValue {
            name: full_name.clone(),
            value: String::new(),
            sub_app_id: None,
            tier: T::ANY,
            data_center: D::ANY,
            allows_overrides: true,
        }];

        for spec in specs {
            let default = DefaultValue {
                name: full_name.clone(),
                value: spec.ciphertext,
                sub_app_id: spec.sub_app_id,
                tier: spec.tier,
                data_center: spec.data_center,
                allows_overrides: spec.allows_overrides,
            };
            if default.is_unconditional() {
                self.binder.errors.push(Error::EncryptedDefault {
                    setting: full_name,
                });
                return;
            }
            if defaults.iter().skip(1).any(|d| d.same_tuple(&default)) {
                self.binder.errors.push(Error::DuplicateDefault {
                    setting: full_name,
                });
                return;
            }
            if let Some(encryptor) = &self.binder.encryptor {
                let check = encryptor
                    .decrypt(&default.value)
                    .and_then(|plain| converter.parse(&plain).map(|_| ()));
                if let Err(e) = check {
                    self.binder.errors.push(Error::InvalidDefault {
                        setting: full_name.clone(),
                        reason: format!("ciphertext default rejected: {e}"),
                    });
                    return;
                }
            }
            defaults.push(default);
        }

        self.binder.saw_encrypted = true;
        self.push_setting(full_name, converter, assign, defaults, SettingMeta {
            description,
            requires_restart,
            encrypted: true,
        });
    }

    fn push_setting<V: Send + Sync + 'static>(
        &mut self,
        name: String,
        converter: Arc<dyn SettingConverter<V>>,
        assign: Box<dyn Fn(&mut G, V) + Send + Sync>,
        defaults: Vec<DefaultValue<T, D>>,
        meta: SettingMeta,
    ) {
        let project = Arc::clone(&self.project);
        let apply_converter = Arc::clone(&converter);
        let apply: ApplyFn<R> = Arc::new(move |instance: &mut R, raw: &str| {
            let value = apply_converter.parse(raw)?;
            assign(project(instance), value);
            Ok(())
        });
        let parse_check: ParseCheckFn =
            Arc::new(move |raw: &str| converter.parse(raw).map(|_| ()));

        self.binder.settings.push(Setting {
            name,
            type_name: std::any::type_name::<V>(),
            description: meta.description,
            is_encrypted: meta.encrypted,
            change_requires_restart: meta.requires_restart,
            defaults,
            apply,
            parse_check,
        });
    }
}

struct SettingMeta {
    description: String,
    requires_restart: bool,
    encrypted: bool,
}

impl<R, G: 'static, T: TierAxis, D: DataCenterAxis> Drop for Scope<'_, R, G, T, D>
where
    R: Default + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let group_defaults = std::mem::take(&mut self.group_defaults);
        if group_defaults.is_empty() {
            return;
        }

        let start = self.start_index;
        let encryptor = self.binder.encryptor.clone();
        for gd in &group_defaults {
            for setting in &mut self.binder.settings[start..] {
                let candidate = DefaultValue {
                    name: setting.name.clone(),
                    value: gd.value.clone(),
                    sub_app_id: gd.sub_app_id,
                    tier: gd.tier,
                    data_center: gd.data_center,
                    allows_overrides: gd.allows_overrides,
                };

                let covered = if setting.is_encrypted {
                    // The implicit zero default occupies the unconditional
                    // tuple; a group default landing there is the forbidden
                    // shape, not a collision.
                    if candidate.is_unconditional() {
                        self.binder.errors.push(Error::EncryptedDefault {
                            setting: setting.name.clone(),
                        });
                        continue;
                    }
                    setting
                        .defaults
                        .iter()
                        .skip(1)
                        .any(|d| d.same_tuple(&candidate))
                } else {
                    setting.defaults.iter().any(|d| d.same_tuple(&candidate))
                };
                if covered {
                    continue;
                }

                let check = if setting.is_encrypted {
                    match &encryptor {
                        Some(enc) => enc
                            .decrypt(&candidate.value)
                            .and_then(|plain| setting.check_parses(&plain)),
                        // Missing encryptor is reported by finish().
                        None => Ok(()),
                    }
                } else {
                    setting.check_parses(&candidate.value)
                };
                if let Err(e) = check {
                    self.binder.errors.push(Error::InvalidDefault {
                        setting: setting.name.clone(),
                        reason: format!("group default rejected: {e}"),
                    });
                    continue;
                }

                setting.defaults.push(candidate);
            }
        }
    }
}

/// In-flight declaration of a plain setting; finalizes when dropped.
pub struct SettingDecl<'s, 'a, R, G: 'static, T: TierAxis, D: DataCenterAxis, V>
where
    R: Default + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    scope: &'s mut Scope<'a, R, G, T, D>,
    name: String,
    assign: Option<Box<dyn Fn(&mut G, V) + Send + Sync>>,
    converter: Option<Arc<dyn SettingConverter<V>>>,
    builtin: Option<Arc<dyn SettingConverter<V>>>,
    converter_conflict: bool,
    description: String,
    requires_restart: bool,
    defaults: Vec<DefaultSpec<T, D, V>>,
}

impl<R, G: 'static, T: TierAxis, D: DataCenterAxis, V> SettingDecl<'_, '_, R, G, T, D, V>
where
    R: Default + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Declare the unconditional default.
    pub fn default(self, value: V) -> Self {
        self.with_default(DefaultSpec::new(value))
    }

    /// Declare a default scoped to a tier.
    pub fn tier_default(self, tier: T, value: V) -> Self {
        self.with_default(DefaultSpec::new(value).tier(tier))
    }

    /// Declare a fully-scoped default.
    pub fn with_default(mut self, spec: DefaultSpec<T, D, V>) -> Self {
        self.defaults.push(spec);
        self
    }

    /// Free-text description.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    /// Attach an explicit converter. Declaring two is a binding error.
    pub fn converter(mut self, converter: Arc<dyn SettingConverter<V>>) -> Self {
        if self.converter.is_some() {
            self.converter_conflict = true;
        }
        self.converter = Some(converter);
        self
    }

    /// Mark that a change requires an application restart (pure metadata).
    pub fn requires_restart(mut self) -> Self {
        self.requires_restart = true;
        self
    }
}

impl<R, G: 'static, T: TierAxis, D: DataCenterAxis, V> Drop for SettingDecl<'_, '_, R, G, T, D, V>
where
    R: Default + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn drop(&mut self) {
        let Some(assign) = self.assign.take() else {
            return;
        };
        self.scope.commit_plain(
            std::mem::take(&mut self.name),
            assign,
            self.converter.take(),
            self.builtin.take(),
            self.converter_conflict,
            std::mem::take(&mut self.description),
            self.requires_restart,
            std::mem::take(&mut self.defaults),
        );
    }
}

/// In-flight declaration of an encrypted setting; finalizes when dropped.
pub struct EncryptedDecl<'s, 'a, R, G: 'static, T: TierAxis, D: DataCenterAxis, V>
where
    R: Default + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    scope: &'s mut Scope<'a, R, G, T, D>,
    name: String,
    assign: Option<Box<dyn Fn(&mut G, V) + Send + Sync>>,
    converter: Option<Arc<dyn SettingConverter<V>>>,
    builtin: Option<Arc<dyn SettingConverter<V>>>,
    converter_conflict: bool,
    description: String,
    requires_restart: bool,
    defaults: Vec<CipherDefault<T, D>>,
}

impl<R, G: 'static, T: TierAxis, D: DataCenterAxis, V> EncryptedDecl<'_, '_, R, G, T, D, V>
where
    R: Default + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Declare a scoped ciphertext default.
    pub fn cipher_default(mut self, spec: CipherDefault<T, D>) -> Self {
        self.defaults.push(spec);
        self
    }

    /// Free-text description.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    /// Attach an explicit converter. Declaring two is a binding error.
    pub fn converter(mut self, converter: Arc<dyn SettingConverter<V>>) -> Self {
        if self.converter.is_some() {
            self.converter_conflict = true;
        }
        self.converter = Some(converter);
        self
    }

    /// Mark that a change requires an application restart (pure metadata).
    pub fn requires_restart(mut self) -> Self {
        self.requires_restart = true;
        self
    }
}

impl<R, G: 'static, T: TierAxis, D: DataCenterAxis, V> Drop for EncryptedDecl<'_, '_, R, G, T, D, V>
where
    R: Default + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn drop(&mut self) {
        let Some(assign) = self.assign.take() else {
            return;
        };
        self.scope.commit_encrypted(
            std::mem::take(&mut self.name),
            assign,
            self.converter.take(),
            self.builtin.take(),
            self.converter_conflict,
            std::mem::take(&mut self.description),
            self.requires_restart,
            std::mem::take(&mut self.defaults),
        );
    }
}
