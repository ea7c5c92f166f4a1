//! Setting and default-value records

use crate::axes::{DataCenterAxis, EvaluationContext, TierAxis};
use crate::by_setting::BySettingItem;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A compile-time default declared on a setting or inherited from a group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound = "")]
pub struct DefaultValue<T: TierAxis, D: DataCenterAxis> {
    /// Dotted setting name. Carried as the map key on the wire.
    #[serde(skip)]
    pub name: String,

    /// String form of the default; ciphertext for encrypted settings, empty
    /// for the implicit zero default of an encrypted setting.
    pub value: String,

    /// Sub-app the default targets, or `None` for every sub-app.
    pub sub_app_id: Option<i32>,

    /// Tier the default targets; `Any` matches every tier.
    pub tier: T,

    /// Data center the default targets; `Any` matches every data center.
    pub data_center: D,

    /// Whether overrides may supersede this default where it wins.
    pub allows_overrides: bool,
}

impl<T: TierAxis, D: DataCenterAxis> DefaultValue<T, D> {
    /// Whether this declaration belongs in the defaults table for
    /// `(tier, sub_app_id)`: its sub-app is unset or equal, and its tier is
    /// `Any` or equal.
    #[must_use]
    pub fn is_kept_for(&self, tier: T, sub_app_id: Option<i32>) -> bool {
        (self.sub_app_id.is_none() || self.sub_app_id == sub_app_id)
            && (self.tier.is_any() || self.tier == tier)
    }

    /// Whether every axis the default names matches the context.
    #[must_use]
    pub fn applies_to(&self, ctx: &EvaluationContext<T, D>) -> bool {
        (self.sub_app_id.is_none() || self.sub_app_id == ctx.sub_app_id)
            && (self.tier.is_any() || self.tier == ctx.tier)
            && (self.data_center.is_any() || self.data_center == ctx.data_center)
    }

    /// Whether this is an unconditional declaration: no sub-app, `Any`
    /// tier, `Any` data center.
    #[must_use]
    pub fn is_unconditional(&self) -> bool {
        self.sub_app_id.is_none() && self.tier.is_any() && self.data_center.is_any()
    }

    /// Whether two declarations occupy the same `(sub-app, tier,
    /// data-center)` tuple, which is a construction error on one setting.
    #[must_use]
    pub fn same_tuple(&self, other: &Self) -> bool {
        self.sub_app_id == other.sub_app_id
            && self.tier == other.tier
            && self.data_center == other.data_center
    }
}

impl<T: TierAxis, D: DataCenterAxis> BySettingItem for DefaultValue<T, D> {
    fn setting_name(&self) -> &str {
        &self.name
    }

    fn set_setting_name(&mut self, name: &str) {
        self.name = name.to_string();
    }
}

pub(crate) type ApplyFn<S> = Arc<dyn Fn(&mut S, &str) -> Result<()> + Send + Sync>;
pub(crate) type ParseCheckFn = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// One bound setting: its schema metadata, collected defaults, and the
/// type-erased closures that parse and assign its value through the group
/// chain.
pub struct Setting<S, T: TierAxis, D: DataCenterAxis> {
    pub(crate) name: String,
    pub(crate) type_name: &'static str,
    pub(crate) description: String,
    pub(crate) is_encrypted: bool,
    pub(crate) change_requires_restart: bool,
    pub(crate) defaults: Vec<DefaultValue<T, D>>,
    pub(crate) apply: ApplyFn<S>,
    pub(crate) parse_check: ParseCheckFn,
}

impl<S, T: TierAxis, D: DataCenterAxis> Setting<S, T, D> {
    /// Dotted path from the root of the settings struct.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the setting's value type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Free-text description, empty when none was declared.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether stored values for this setting are ciphertext.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.is_encrypted
    }

    /// Pure metadata: the application must restart for a change to take
    /// effect.
    #[must_use]
    pub fn change_requires_restart(&self) -> bool {
        self.change_requires_restart
    }

    /// All declared defaults, in declaration order (plus the implicit zero
    /// default for encrypted settings).
    #[must_use]
    pub fn defaults(&self) -> &[DefaultValue<T, D>] {
        &self.defaults
    }

    /// Parse `raw` and assign it to this setting on `instance`, walking
    /// through any nested groups. `raw` must be plaintext; encrypted values
    /// are decrypted before this is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`](crate::Error::Conversion) when `raw`
    /// does not parse for the setting's type.
    pub fn apply(&self, instance: &mut S, raw: &str) -> Result<()> {
        (self.apply)(instance, raw)
    }

    /// Validate that `raw` parses for this setting's type without touching
    /// an instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`](crate::Error::Conversion) when it does
    /// not.
    pub fn check_parses(&self, raw: &str) -> Result<()> {
        (self.parse_check)(raw)
    }
}

impl<S, T: TierAxis, D: DataCenterAxis> Clone for Setting<S, T, D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            type_name: self.type_name,
            description: self.description.clone(),
            is_encrypted: self.is_encrypted,
            change_requires_restart: self.change_requires_restart,
            defaults: self.defaults.clone(),
            apply: Arc::clone(&self.apply),
            parse_check: Arc::clone(&self.parse_check),
        }
    }
}

impl<S, T: TierAxis, D: DataCenterAxis> std::fmt::Debug for Setting<S, T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setting")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("is_encrypted", &self.is_encrypted)
            .field("defaults", &self.defaults.len())
            .finish_non_exhaustive()
    }
}

impl<S, T: TierAxis, D: DataCenterAxis> BySettingItem for Setting<S, T, D> {
    fn setting_name(&self) -> &str {
        &self.name
    }

    fn set_setting_name(&mut self, name: &str) {
        self.name = name.to_string();
    }
}
