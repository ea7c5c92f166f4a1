//! Value selection and settings materialization
//!
//! Pure: for a fixed `(schema, defaults, snapshot, context, now)` the
//! output is identical across runs. Selection per setting follows the
//! strict precedence chain — an override beats a default, then a named
//! sub-app beats none, a named tier beats `Any`, a named data center beats
//! `Any` — with remaining ties broken by the earlier value.

use crate::axes::{DataCenterAxis, EvaluationContext, TierAxis};
use crate::by_setting::ListBySetting;
use crate::error::Error;
use crate::schema::{DefaultValue, Schema, Setting};
use crate::snapshot::{Commit, OverrideValue, Snapshot};
use std::sync::Arc;
use time::OffsetDateTime;

/// Diagnostic for a value that failed to materialize: bad parse, failed
/// decryption, or an override rejected by `allows_overrides`.
///
/// The resolver records these and keeps going; the returned instance holds
/// the setting's most specific remaining value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidOverride {
    pub setting_name: String,
    pub value: String,
    pub reason: String,
}

impl std::fmt::Display for InvalidOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid value for {}: {} ({:?})",
            self.setting_name, self.reason, self.value
        )
    }
}

/// A materialized settings instance and its provenance.
pub struct Resolved<S> {
    /// The settings instance. Never mutated after publication.
    pub settings: Arc<S>,
    /// Commit of the snapshot the instance was resolved from.
    pub commit: Commit,
    /// Per-setting failures encountered while materializing.
    pub invalid_overrides: Vec<InvalidOverride>,
}

impl<S> Resolved<S> {
    /// Whether every stored value materialized cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.invalid_overrides.is_empty()
    }
}

impl<S> Clone for Resolved<S> {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            commit: self.commit.clone(),
            invalid_overrides: self.invalid_overrides.clone(),
        }
    }
}

impl<S> std::fmt::Debug for Resolved<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("commit", &self.commit)
            .field("invalid_overrides", &self.invalid_overrides)
            .finish_non_exhaustive()
    }
}

/// Specificity rank inside one precedence class. Bit order encodes the
/// precedence chain: sub-app, then tier, then data center.
fn rank(has_sub_app: bool, has_tier: bool, has_data_center: bool) -> u8 {
    (u8::from(has_sub_app) << 2) | (u8::from(has_tier) << 1) | u8::from(has_data_center)
}

/// The winning default among those applicable to `ctx`, or `None`.
pub(crate) fn best_default<'a, T: TierAxis, D: DataCenterAxis>(
    candidates: &'a [DefaultValue<T, D>],
    ctx: &EvaluationContext<T, D>,
) -> Option<&'a DefaultValue<T, D>> {
    let mut best: Option<(&DefaultValue<T, D>, u8)> = None;
    for candidate in candidates {
        if !candidate.applies_to(ctx) {
            continue;
        }
        let r = rank(
            candidate.sub_app_id.is_some(),
            !candidate.tier.is_any(),
            !candidate.data_center.is_any(),
        );
        // Strict comparison: the earlier candidate wins ties.
        if best.is_none_or(|(_, b)| r > b) {
            best = Some((candidate, r));
        }
    }
    best.map(|(d, _)| d)
}

/// The winning live override among those applicable to `ctx`, or `None`.
pub(crate) fn best_override<'a, T: TierAxis, D: DataCenterAxis>(
    candidates: &'a [OverrideValue<D>],
    ctx: &EvaluationContext<T, D>,
    now: OffsetDateTime,
) -> Option<&'a OverrideValue<D>> {
    let mut best: Option<(&OverrideValue<D>, u8)> = None;
    for candidate in candidates {
        if candidate.is_expired(now) || !candidate.applies_to(ctx) {
            continue;
        }
        let r = rank(
            candidate.sub_app_id.is_some(),
            false,
            !candidate.data_center.is_any(),
        );
        if best.is_none_or(|(_, b)| r > b) {
            best = Some((candidate, r));
        }
    }
    best.map(|(o, _)| o)
}

/// Materialize a settings instance from a snapshot.
///
/// `defaults` is the table produced by
/// [`Schema::defaults_for`](crate::Schema::defaults_for) for the context's
/// tier and sub-app. Per-setting failures never abort the build: the
/// affected setting falls back to its most specific remaining value and a
/// diagnostic is recorded.
#[must_use]
pub fn resolve<S, T, D>(
    schema: &Schema<S, T, D>,
    defaults: &ListBySetting<DefaultValue<T, D>>,
    snapshot: &Snapshot<D>,
    ctx: &EvaluationContext<T, D>,
    now: OffsetDateTime,
) -> Resolved<S>
where
    S: Default + Send + Sync + 'static,
    T: TierAxis,
    D: DataCenterAxis,
{
    let mut instance = schema.build_instance();
    let mut diagnostics = Vec::new();

    for setting in schema.settings() {
        let name = setting.name();
        let winning_default = best_default(defaults.get_all(name), ctx);
        let winning_override = best_override(snapshot.overrides.get_all(name), ctx, now);

        if let Some(ov) = winning_override {
            let allowed = winning_default.is_none_or(|d| d.allows_overrides);
            if !allowed {
                diagnostics.push(InvalidOverride {
                    setting_name: name.to_string(),
                    value: ov.value.clone(),
                    reason: "overrides are not allowed by the winning default".into(),
                });
            } else {
                match apply_value(schema, setting, &mut instance, &ov.value) {
                    Ok(()) => continue,
                    Err(e) => diagnostics.push(InvalidOverride {
                        setting_name: name.to_string(),
                        value: ov.value.clone(),
                        reason: e.to_string(),
                    }),
                }
            }
        }

        let Some(default) = winning_default else {
            continue;
        };
        if setting.is_encrypted() && default.is_unconditional() {
            // Implicit zero default: the factory value stands.
            continue;
        }
        if let Err(e) = apply_value(schema, setting, &mut instance, &default.value) {
            diagnostics.push(InvalidOverride {
                setting_name: name.to_string(),
                value: default.value.clone(),
                reason: format!("default failed to materialize: {e}"),
            });
        }
    }

    Resolved {
        settings: Arc::new(instance),
        commit: snapshot.commit.clone(),
        invalid_overrides: diagnostics,
    }
}

fn apply_value<S, T, D>(
    schema: &Schema<S, T, D>,
    setting: &Setting<S, T, D>,
    instance: &mut S,
    stored: &str,
) -> crate::Result<()>
where
    S: Default + Send + Sync + 'static,
    T: TierAxis,
    D: DataCenterAxis,
{
    if setting.is_encrypted() {
        let encryptor = schema.encryptor().ok_or_else(|| {
            Error::InvalidEncryptor("encrypted setting resolved without an encryptor".into())
        })?;
        let plaintext = encryptor.decrypt(stored).map_err(|_| Error::DecryptionFailed {
            setting: setting.name().to_string(),
        })?;
        setting.apply(instance, &plaintext)
    } else {
        setting.apply(instance, stored)
    }
}

// =============================================================================
// Tests
// =============================================================================
