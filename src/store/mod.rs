//! The override store
//!
//! A [`SettingsStore`] binds a schema to a current `(tier, data center)`
//! and owns `app name → snapshot` through a pluggable backend. It provides
//! the mutation surface (`set_override` / `clear_override` /
//! `restore_snapshot`, each with commit-based compare-and-set), resolution
//! of materialized settings, subscriptions with cached refresh, and audit
//! fan-out to registered event loggers.

pub mod backend;
pub mod hash;
mod subscribers;

pub use backend::{ChangeListener, MemoryBackend, MutateFn, StoreBackend};
pub use hash::{HashBackend, HashTransport, MemoryHashTransport};
pub use subscribers::{Subscription, UpdateCallback};

use crate::axes::{DataCenterAxis, EvaluationContext, TierAxis};
use crate::by_setting::ListBySetting;
use crate::error::{Error, Result};
use crate::logging::EventLogger;
use crate::resolve::{Resolved, best_default, resolve};
use crate::schema::{DefaultValue, Schema};
use crate::snapshot::{Commit, Event, OverrideValue, Snapshot};
use crate::store::subscribers::{SubscriberRegistry, SubscriptionInner};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;

/// Cooperative cancellation handle for mutating operations.
///
/// A cancelled token aborts the operation before it commits; once a commit
/// has happened the operation is past cancellation.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for [`SettingsStore::set_override`].
#[derive(Clone, Debug, Default)]
pub struct SetOverrideOptions {
    sub_app_id: Option<i32>,
    expires_at: Option<OffsetDateTime>,
    expected_commit: Option<Commit>,
    token: Option<CancellationToken>,
}

impl SetOverrideOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a sub-app instead of the whole app.
    #[must_use]
    pub fn sub_app(mut self, sub_app_id: i32) -> Self {
        self.sub_app_id = Some(sub_app_id);
        self
    }

    /// Expire the override at `at`.
    #[must_use]
    pub fn expires_at(mut self, at: OffsetDateTime) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Compare-and-set: commit only if the store is still at `commit`.
    #[must_use]
    pub fn expect_commit(mut self, commit: Commit) -> Self {
        self.expected_commit = Some(commit);
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }
}

/// Options for [`SettingsStore::clear_override`].
#[derive(Clone, Debug, Default)]
pub struct ClearOverrideOptions {
    sub_app_id: Option<i32>,
    expected_commit: Option<Commit>,
    token: Option<CancellationToken>,
}

impl ClearOverrideOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the override targeting a sub-app.
    #[must_use]
    pub fn sub_app(mut self, sub_app_id: i32) -> Self {
        self.sub_app_id = Some(sub_app_id);
        self
    }

    /// Compare-and-set: commit only if the store is still at `commit`.
    #[must_use]
    pub fn expect_commit(mut self, commit: Commit) -> Self {
        self.expected_commit = Some(commit);
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }
}

/// Options for [`SettingsStore::restore_snapshot`].
#[derive(Clone, Debug, Default)]
pub struct RestoreOptions {
    expected_commit: Option<Commit>,
    token: Option<CancellationToken>,
}

impl RestoreOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare-and-set: commit only if the store is still at `commit`.
    #[must_use]
    pub fn expect_commit(mut self, commit: Commit) -> Self {
        self.expected_commit = Some(commit);
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }
}

/// Store over a schema, a fixed current context, and a backend.
pub struct SettingsStore<S, T, D, B>
where
    S: Default + Send + Sync + 'static,
    T: TierAxis,
    D: DataCenterAxis,
    B: StoreBackend<D>,
{
    schema: Arc<Schema<S, T, D>>,
    tier: T,
    data_center: D,
    backend: B,
    subscribers: Arc<SubscriberRegistry<S>>,
    loggers: RwLock<Vec<Arc<dyn EventLogger<D>>>>,
    defaults_cache: Mutex<HashMap<Option<i32>, Arc<ListBySetting<DefaultValue<T, D>>>>>,
}

impl<S, T, D> SettingsStore<S, T, D, MemoryBackend<D>>
where
    S: Default + Send + Sync + 'static,
    T: TierAxis,
    D: DataCenterAxis,
{
    /// Create a store over the in-memory reference backend.
    ///
    /// # Errors
    ///
    /// [`Error::WildcardContext`] when `tier` or `data_center` is `Any`.
    pub fn in_memory(schema: Arc<Schema<S, T, D>>, tier: T, data_center: D) -> Result<Arc<Self>> {
        Self::new(schema, tier, data_center, MemoryBackend::new())
    }
}

impl<S, T, D, B> SettingsStore<S, T, D, B>
where
    S: Default + Send + Sync + 'static,
    T: TierAxis,
    D: DataCenterAxis,
    B: StoreBackend<D>,
{
    /// Create a store and wire it to the backend's change notifications.
    ///
    /// # Errors
    ///
    /// [`Error::WildcardContext`] when `tier` or `data_center` is `Any`;
    /// [`Error::Transport`] when the backend's notification channel cannot
    /// be established.
    pub fn new(
        schema: Arc<Schema<S, T, D>>,
        tier: T,
        data_center: D,
        backend: B,
    ) -> Result<Arc<Self>> {
        EvaluationContext::new(tier, data_center)?;

        let store = Arc::new(Self {
            schema,
            tier,
            data_center,
            backend,
            subscribers: Arc::new(SubscriberRegistry::new()),
            loggers: RwLock::new(Vec::new()),
            defaults_cache: Mutex::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&store);
        store.backend.on_change(Arc::new(move |app_name: &str| {
            if let Some(live) = weak.upgrade() {
                live.handle_change(app_name);
            }
        }))?;

        Ok(store)
    }

    /// The store's current tier.
    #[must_use]
    pub fn tier(&self) -> T {
        self.tier
    }

    /// The store's current data center.
    #[must_use]
    pub fn data_center(&self) -> D {
        self.data_center
    }

    /// The bound schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema<S, T, D>> {
        &self.schema
    }

    /// Register an audit logger; every committed mutation is fanned out to
    /// it as `(event, snapshot)`.
    pub fn add_logger(&self, logger: Arc<dyn EventLogger<D>>) {
        self.loggers.write().push(logger);
    }

    /// Number of active subscriptions, across all apps.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscribers.len()
    }

    fn context(&self, sub_app_id: Option<i32>) -> EvaluationContext<T, D> {
        EvaluationContext {
            sub_app_id,
            tier: self.tier,
            data_center: self.data_center,
        }
    }

    fn defaults(&self, sub_app_id: Option<i32>) -> Arc<ListBySetting<DefaultValue<T, D>>> {
        let mut cache = self.defaults_cache.lock();
        Arc::clone(
            cache
                .entry(sub_app_id)
                .or_insert_with(|| Arc::new(self.schema.defaults_for(self.tier, sub_app_id))),
        )
    }

    /// The app's current snapshot; the empty state when nothing is stored.
    ///
    /// # Errors
    ///
    /// Backend transport or corruption failures.
    pub fn get_snapshot(&self, app_name: &str) -> Result<Snapshot<D>> {
        Ok(self
            .backend
            .load(app_name)?
            .unwrap_or_else(|| Snapshot::empty(app_name)))
    }

    /// Materialize the app's settings at the store's context.
    ///
    /// # Errors
    ///
    /// Backend transport or corruption failures. Per-setting value failures
    /// do not error; they are reported in
    /// [`Resolved::invalid_overrides`].
    pub fn get_settings(&self, app_name: &str) -> Result<Resolved<S>> {
        self.get_settings_for(app_name, None)
    }

    /// Materialize the app's settings for a sub-app.
    ///
    /// # Errors
    ///
    /// Backend transport or corruption failures.
    pub fn get_settings_for(&self, app_name: &str, sub_app_id: Option<i32>) -> Result<Resolved<S>> {
        let snapshot = self.get_snapshot(app_name)?;
        let defaults = self.defaults(sub_app_id);
        Ok(resolve(
            &self.schema,
            &defaults,
            &snapshot,
            &self.context(sub_app_id),
            OffsetDateTime::now_utc(),
        ))
    }

    /// Set (or replace) an override.
    ///
    /// Any existing override for the setting with the same `(sub-app, data
    /// center)` identity is replaced; expired overrides are swept. Returns
    /// the committed snapshot, or `None` on a compare-and-set miss.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownSetting`], [`Error::InvalidOverrideValue`] (bad
    /// parse, or an encrypted setting given a value that does not decrypt),
    /// [`Error::OverridesNotAllowed`], [`Error::Cancelled`], and backend
    /// failures.
    pub fn set_override(
        &self,
        app_name: &str,
        setting_name: &str,
        value: &str,
        data_center: D,
        user: &str,
        options: SetOverrideOptions,
    ) -> Result<Option<Snapshot<D>>> {
        let setting = self
            .schema
            .get(setting_name)
            .ok_or_else(|| Error::UnknownSetting(setting_name.to_string()))?;

        if setting.is_encrypted() {
            let encryptor = self.schema.encryptor().ok_or_else(|| {
                Error::InvalidEncryptor("store has no encryptor for encrypted setting".into())
            })?;
            let plaintext = encryptor.decrypt(value).map_err(|_| Error::InvalidOverrideValue {
                setting: setting_name.to_string(),
                reason: "value is not a decryptable ciphertext".into(),
            })?;
            setting
                .check_parses(&plaintext)
                .map_err(|e| Error::InvalidOverrideValue {
                    setting: setting_name.to_string(),
                    reason: e.to_string(),
                })?;
        } else {
            setting
                .check_parses(value)
                .map_err(|e| Error::InvalidOverrideValue {
                    setting: setting_name.to_string(),
                    reason: e.to_string(),
                })?;
        }

        // Evaluate allows-overrides at the most specific context the
        // override can win in.
        let check_context = EvaluationContext {
            sub_app_id: options.sub_app_id,
            tier: self.tier,
            data_center: if data_center.is_any() {
                self.data_center
            } else {
                data_center
            },
        };
        let defaults = self.defaults(options.sub_app_id);
        if let Some(covering) = best_default(defaults.get_all(setting_name), &check_context) {
            if !covering.allows_overrides {
                return Err(Error::OverridesNotAllowed {
                    setting: setting_name.to_string(),
                });
            }
        }

        let now = OffsetDateTime::now_utc();
        let committed = self.backend.transact(app_name, &mut |current| {
            if let Some(expected) = &options.expected_commit {
                if *expected != current.commit {
                    debug!("set_override CAS miss for {app_name}/{setting_name}");
                    return Ok(None);
                }
            }
            check_token(options.token.as_ref())?;

            let mut next: Vec<OverrideValue<D>> = current
                .overrides
                .iter()
                .filter(|o| {
                    !(o.name == setting_name
                        && o.same_identity(options.sub_app_id, data_center))
                        && !o.is_expired(now)
                })
                .cloned()
                .collect();

            let mut ov = OverrideValue::new(setting_name, value, data_center);
            ov.sub_app_id = options.sub_app_id;
            ov.expires_at = options.expires_at;
            next.push(ov);

            let commit = Commit::mint();
            let event = Event::set_override(
                app_name,
                setting_name,
                value,
                data_center,
                user,
                now,
                commit.clone(),
            );
            Ok(Some(Snapshot {
                app_name: app_name.to_string(),
                commit,
                overrides: ListBySetting::new(next),
                last_event: Some(event),
            }))
        })?;

        if let Some(snapshot) = &committed {
            info!(
                "override set: {app_name}/{setting_name} by {user} (commit {})",
                snapshot.commit
            );
            self.log_mutation(snapshot);
        }
        Ok(committed)
    }

    /// Remove the override matching `(setting, sub-app, data center)`.
    ///
    /// Returns the committed snapshot; `None` when no matching override
    /// exists or on a compare-and-set miss.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] and backend failures.
    pub fn clear_override(
        &self,
        app_name: &str,
        setting_name: &str,
        data_center: D,
        user: &str,
        options: ClearOverrideOptions,
    ) -> Result<Option<Snapshot<D>>> {
        let now = OffsetDateTime::now_utc();
        let committed = self.backend.transact(app_name, &mut |current| {
            if let Some(expected) = &options.expected_commit {
                if *expected != current.commit {
                    debug!("clear_override CAS miss for {app_name}/{setting_name}");
                    return Ok(None);
                }
            }

            let matches = |o: &OverrideValue<D>| {
                o.name == setting_name && o.same_identity(options.sub_app_id, data_center)
            };
            if !current.overrides.iter().any(|o| matches(o)) {
                return Ok(None);
            }
            check_token(options.token.as_ref())?;

            let next: Vec<OverrideValue<D>> = current
                .overrides
                .iter()
                .filter(|o| !matches(o) && !o.is_expired(now))
                .cloned()
                .collect();

            let commit = Commit::mint();
            let event = Event::clear_override(
                app_name,
                setting_name,
                data_center,
                user,
                now,
                commit.clone(),
            );
            Ok(Some(Snapshot {
                app_name: app_name.to_string(),
                commit,
                overrides: ListBySetting::new(next),
                last_event: Some(event),
            }))
        })?;

        if let Some(snapshot) = &committed {
            info!(
                "override cleared: {app_name}/{setting_name} by {user} (commit {})",
                snapshot.commit
            );
            self.log_mutation(snapshot);
        }
        Ok(committed)
    }

    /// Replace the app's override set wholesale with `snapshot`'s.
    ///
    /// Produces a fresh commit whose event records the restored commit.
    /// Returns `None` on a compare-and-set miss.
    ///
    /// # Errors
    ///
    /// [`Error::SnapshotAppMismatch`] when the snapshot belongs to another
    /// app, [`Error::Cancelled`], and backend failures.
    pub fn restore_snapshot(
        &self,
        app_name: &str,
        snapshot: &Snapshot<D>,
        user: &str,
        options: RestoreOptions,
    ) -> Result<Option<Snapshot<D>>> {
        if snapshot.app_name != app_name {
            return Err(Error::SnapshotAppMismatch {
                expected: app_name.to_string(),
                actual: snapshot.app_name.clone(),
            });
        }

        let now = OffsetDateTime::now_utc();
        let committed = self.backend.transact(app_name, &mut |current| {
            if let Some(expected) = &options.expected_commit {
                if *expected != current.commit {
                    debug!("restore CAS miss for {app_name}");
                    return Ok(None);
                }
            }
            check_token(options.token.as_ref())?;

            let commit = Commit::mint();
            let event = Event::restore(
                app_name,
                snapshot.commit.clone(),
                user,
                now,
                commit.clone(),
            );
            Ok(Some(Snapshot {
                app_name: app_name.to_string(),
                commit,
                overrides: snapshot.overrides.clone(),
                last_event: Some(event),
            }))
        })?;

        if let Some(new_snapshot) = &committed {
            info!(
                "snapshot {} restored onto {app_name} by {user} (commit {})",
                snapshot.commit, new_snapshot.commit
            );
            self.log_mutation(new_snapshot);
        }
        Ok(committed)
    }

    /// Subscribe to the app's materialized settings at the store's context.
    ///
    /// The callback fires immediately with the current settings, then once
    /// per committed mutation that changes the resolved commit. Deliveries
    /// are serialized per subscription and arrive in commit order. If a
    /// refresh fails, the callback receives the error and the cached entry
    /// stays as it was.
    ///
    /// Dispatch happens on the mutating thread. A callback must not
    /// synchronously mutate the app it is subscribed to; the resulting
    /// self-notification would wait on the delivery already in flight.
    pub fn subscribe(
        &self,
        app_name: &str,
        callback: impl Fn(Result<Resolved<S>>) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe_sub_app(app_name, None, callback)
    }

    /// [`subscribe`](Self::subscribe), narrowed to a sub-app.
    pub fn subscribe_sub_app(
        &self,
        app_name: &str,
        sub_app_id: Option<i32>,
        callback: impl Fn(Result<Resolved<S>>) + Send + Sync + 'static,
    ) -> Subscription {
        let inner = self
            .subscribers
            .insert(app_name, sub_app_id, Box::new(callback));
        debug!("subscription {} added for {app_name}", inner.id);

        // Initial delivery with the current materialized settings.
        self.refresh(&inner);

        let registry = Arc::clone(&self.subscribers);
        Subscription::new(
            inner.id,
            Arc::clone(&inner.cancelled),
            Box::new(move |id| registry.remove(id)),
        )
    }

    fn handle_change(&self, app_name: &str) {
        debug!("change notification for {app_name}");
        for subscription in self.subscribers.matching(app_name) {
            self.refresh(&subscription);
        }
    }

    fn refresh(&self, subscription: &SubscriptionInner<S>) {
        // The state lock serializes this subscription's deliveries.
        let mut state = subscription.state.lock();
        if subscription.cancelled.load(Ordering::SeqCst) {
            return;
        }

        match self.get_settings_for(&subscription.app_name, subscription.sub_app_id) {
            Ok(resolved) => {
                if state
                    .as_ref()
                    .is_some_and(|last| last.commit == resolved.commit)
                {
                    return;
                }
                *state = Some(resolved.clone());
                (subscription.callback)(Ok(resolved));
            }
            Err(e) => {
                warn!(
                    "refresh failed for {} subscription {}: {e}",
                    subscription.app_name, subscription.id
                );
                (subscription.callback)(Err(e));
            }
        }
    }

    fn log_mutation(&self, snapshot: &Snapshot<D>) {
        let Some(event) = &snapshot.last_event else {
            return;
        };
        let loggers: Vec<Arc<dyn EventLogger<D>>> = self.loggers.read().clone();
        for logger in loggers {
            logger.log(event.clone(), snapshot.clone());
        }
    }
}

fn check_token(token: Option<&CancellationToken>) -> Result<()> {
    match token {
        Some(token) if token.is_cancelled() => Err(Error::Cancelled),
        _ => Ok(()),
    }
}
