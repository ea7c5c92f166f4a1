//! Snapshot state: commits, overrides, and mutation events
//!
//! A [`Snapshot`] is the unit of state exchanged between the store, the
//! resolver, and the audit log. Snapshots are immutable: every successful
//! mutation produces a new snapshot with a freshly minted [`Commit`].

use crate::axes::{DataCenterAxis, EvaluationContext, TierAxis};
use crate::by_setting::{BySettingItem, ListBySetting};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Opaque token identifying one committed override set for an app.
///
/// Tokens are distinct across every successful mutation; the empty state is
/// identified by [`Commit::initial`] (the nil UUID).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Commit(String);

impl Commit {
    /// The sentinel commit of the empty state.
    #[must_use]
    pub fn initial() -> Self {
        Commit(Uuid::nil().to_string())
    }

    /// Mint a fresh, globally distinct commit.
    #[must_use]
    pub fn mint() -> Self {
        Commit(Uuid::new_v4().to_string())
    }

    /// Whether this is the empty-state sentinel.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self == &Self::initial()
    }

    /// The token's string form, as persisted.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Commit {
    fn from(raw: &str) -> Self {
        Commit(raw.to_string())
    }
}

impl From<String> for Commit {
    fn from(raw: String) -> Self {
        Commit(raw)
    }
}

/// A persisted runtime value superseding a default when applicable.
///
/// Tier is implicit in the owning store's identity; overrides never carry
/// one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound = "")]
pub struct OverrideValue<D: DataCenterAxis> {
    /// Dotted setting name. Carried as the map key on the wire.
    #[serde(skip)]
    pub name: String,

    /// The override's string value; ciphertext for encrypted settings.
    pub value: String,

    /// Sub-app the override targets, or `None` for the whole app.
    pub sub_app_id: Option<i32>,

    /// Data center the override targets; `Any` matches every context.
    pub data_center: D,

    /// When set and in the past, the override no longer resolves. It stays
    /// stored until the next mutation sweeps it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,
}

impl<D: DataCenterAxis> OverrideValue<D> {
    /// Create an override with no sub-app and no expiry.
    pub fn new(name: impl Into<String>, value: impl Into<String>, data_center: D) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            sub_app_id: None,
            data_center,
            expires_at: None,
        }
    }

    /// Target a sub-app.
    #[must_use]
    pub fn with_sub_app(mut self, sub_app_id: i32) -> Self {
        self.sub_app_id = Some(sub_app_id);
        self
    }

    /// Give the override an expiry instant.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the override is expired as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether every axis the override names matches the context.
    #[must_use]
    pub fn applies_to<T: TierAxis>(&self, ctx: &EvaluationContext<T, D>) -> bool {
        (self.sub_app_id.is_none() || self.sub_app_id == ctx.sub_app_id)
            && (self.data_center.is_any() || self.data_center == ctx.data_center)
    }

    /// Replace-semantics identity: two overrides on one setting are the
    /// same when their `(sub-app, data-center)` tuples are equal.
    #[must_use]
    pub fn same_identity(&self, sub_app_id: Option<i32>, data_center: D) -> bool {
        self.sub_app_id == sub_app_id && self.data_center == data_center
    }
}

impl<D: DataCenterAxis> BySettingItem for OverrideValue<D> {
    fn setting_name(&self) -> &str {
        &self.name
    }

    fn set_setting_name(&mut self, name: &str) {
        self.name = name.to_string();
    }
}

/// The kind of a mutation event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    SetOverride,
    ClearOverride,
    RestoreSnapshot,
}

/// Immutable record of one committed mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound = "")]
pub struct Event<D: DataCenterAxis> {
    #[serde(rename = "type")]
    pub event_type: EventType,

    #[serde(rename = "app")]
    pub app_name: String,

    #[serde(
        rename = "setting",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub setting_name: Option<String>,

    /// The value written, for `SetOverride`; ciphertext for encrypted
    /// settings, so plaintext never reaches a log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_center: Option<D>,

    /// The commit that was restored, for `RestoreSnapshot`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_commit: Option<Commit>,

    /// Who performed the mutation.
    pub user: String,

    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    /// The commit the mutation produced.
    pub commit: Commit,
}

impl<D: DataCenterAxis> Event<D> {
    pub(crate) fn set_override(
        app_name: &str,
        setting_name: &str,
        value: &str,
        data_center: D,
        user: &str,
        timestamp: OffsetDateTime,
        commit: Commit,
    ) -> Self {
        Self {
            event_type: EventType::SetOverride,
            app_name: app_name.to_string(),
            setting_name: Some(setting_name.to_string()),
            value: Some(value.to_string()),
            data_center: Some(data_center),
            restored_commit: None,
            user: user.to_string(),
            timestamp,
            commit,
        }
    }

    pub(crate) fn clear_override(
        app_name: &str,
        setting_name: &str,
        data_center: D,
        user: &str,
        timestamp: OffsetDateTime,
        commit: Commit,
    ) -> Self {
        Self {
            event_type: EventType::ClearOverride,
            app_name: app_name.to_string(),
            setting_name: Some(setting_name.to_string()),
            value: None,
            data_center: Some(data_center),
            restored_commit: None,
            user: user.to_string(),
            timestamp,
            commit,
        }
    }

    pub(crate) fn restore(
        app_name: &str,
        restored_commit: Commit,
        user: &str,
        timestamp: OffsetDateTime,
        commit: Commit,
    ) -> Self {
        Self {
            event_type: EventType::RestoreSnapshot,
            app_name: app_name.to_string(),
            setting_name: None,
            value: None,
            data_center: None,
            restored_commit: Some(restored_commit),
            user: user.to_string(),
            timestamp,
            commit,
        }
    }
}

/// Immutable `(commit, overrides, last event)` state of one app.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound = "")]
pub struct Snapshot<D: DataCenterAxis> {
    pub app_name: String,
    pub commit: Commit,
    pub overrides: ListBySetting<OverrideValue<D>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event: Option<Event<D>>,
}

impl<D: DataCenterAxis> Snapshot<D> {
    /// The empty state of an app: [`Commit::initial`], no overrides, no
    /// last event.
    #[must_use]
    pub fn empty(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            commit: Commit::initial(),
            overrides: ListBySetting::empty(),
            last_event: None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    crate::axis_enum! {
        tier enum Tier { Any, Local, Prod }
    }

    crate::axis_enum! {
        data_center enum Dc { Any, East, West }
    }

    #[test]
    fn test_commit_sentinels() {
        assert!(Commit::initial().is_initial());
        let minted = Commit::mint();
        assert!(!minted.is_initial());
        assert_ne!(Commit::mint(), minted);
    }

    #[test]
    fn test_override_expiry() {
        let now = datetime!(2020-06-01 12:00 UTC);
        let alive = OverrideValue::new("a", "1", Dc::Any);
        assert!(!alive.is_expired(now));

        let expired = OverrideValue::new("a", "1", Dc::Any)
            .with_expiry(datetime!(2020-06-01 11:59 UTC));
        assert!(expired.is_expired(now));

        let future = OverrideValue::new("a", "1", Dc::Any)
            .with_expiry(datetime!(2020-06-01 12:01 UTC));
        assert!(!future.is_expired(now));
    }

    #[test]
    fn test_override_applicability() {
        let ctx = EvaluationContext::new(Tier::Prod, Dc::East).unwrap();

        assert!(OverrideValue::new("a", "1", Dc::Any).applies_to(&ctx));
        assert!(OverrideValue::new("a", "1", Dc::East).applies_to(&ctx));
        assert!(!OverrideValue::new("a", "1", Dc::West).applies_to(&ctx));

        // Sub-app overrides only apply to that sub-app.
        let scoped = OverrideValue::new("a", "1", Dc::Any).with_sub_app(3);
        assert!(!scoped.applies_to(&ctx));
        assert!(scoped.applies_to(&ctx.with_sub_app(3)));

        // App-wide overrides also apply within a sub-app.
        assert!(OverrideValue::new("a", "1", Dc::Any).applies_to(&ctx.with_sub_app(3)));
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let event = Event::set_override(
            "app",
            "TopInteger",
            "3",
            Dc::Any,
            "alice",
            datetime!(2020-01-02 03:04:05 UTC),
            Commit::from("c-1"),
        );
        let snapshot = Snapshot {
            app_name: "app".into(),
            commit: Commit::from("c-1"),
            overrides: ListBySetting::new(vec![
                OverrideValue::new("TopInteger", "3", Dc::Any),
                OverrideValue::new("Nested.Integer", "9", Dc::East).with_sub_app(2),
            ]),
            last_event: Some(event),
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "appName": "app",
                "commit": "c-1",
                "overrides": {
                    "Nested.Integer": [
                        {"value": "9", "subAppId": 2, "dataCenter": "East"}
                    ],
                    "TopInteger": [
                        {"value": "3", "subAppId": null, "dataCenter": "Any"}
                    ],
                },
                "lastEvent": {
                    "type": "SetOverride",
                    "app": "app",
                    "setting": "TopInteger",
                    "value": "3",
                    "dataCenter": "Any",
                    "user": "alice",
                    "timestamp": "2020-01-02T03:04:05Z",
                    "commit": "c-1",
                },
            })
        );

        let back: Snapshot<Dc> = serde_json::from_value(json).unwrap();
        assert_eq!(back.commit, snapshot.commit);
        assert_eq!(back.overrides.len(), 2);
        assert_eq!(back.overrides.get_all("TopInteger")[0].name, "TopInteger");
        assert_eq!(back.last_event, snapshot.last_event);
    }
}
