//! Redis-flavored hash persistence
//!
//! One hash per app, using the legacy NFig.Redis field layout:
//!
//! - `$commit` — the current commit token;
//! - `$lastEvent` — the last mutation event, as JSON;
//! - `:<tierOrd>:<dcOrd>;<settingName>` — an override value, with an extra
//!   `:<subAppId>` ordinal segment when the override targets a sub-app.
//!
//! Field identity is exactly `(tier, data center, sub-app, setting)`, so a
//! transport-level replace keeps the store's replace semantics. Expiry is
//! framed into the value (`@<unix-ms>|<raw>`; a leading literal `@` escapes
//! as `@|`), never into the field name.
//!
//! The commit stamp and the override fields are written in a single
//! transactional swap guarded on `$commit` (the WATCH/MULTI/EXEC
//! equivalent), so a reader can never observe fresh data under a stale
//! commit. Commits are announced on the `NFig-AppUpdate` channel; the
//! backend reloads on receipt, which covers local and remote writers with
//! one path.
//!
//! Concrete drivers are out of scope: [`HashTransport`] is the contract a
//! Redis binding implements, and [`MemoryHashTransport`] is the in-process
//! reference used by tests.

use crate::axes::{DataCenterAxis, TierAxis};
use crate::by_setting::ListBySetting;
use crate::error::{Error, Result};
use crate::snapshot::{Event, OverrideValue, Snapshot};
use crate::store::backend::{ChangeListener, MutateFn, StoreBackend};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use time::OffsetDateTime;

/// Hash field holding the commit token.
pub const COMMIT_FIELD: &str = "$commit";

/// Hash field holding the last event as JSON.
pub const LAST_EVENT_FIELD: &str = "$lastEvent";

/// Pub/sub channel carrying app-name payloads after each commit.
pub const UPDATE_CHANNEL: &str = "NFig-AppUpdate";

/// Minimal transactional hash + pub/sub surface a driver must provide.
pub trait HashTransport: Send + Sync + 'static {
    /// All `(field, value)` pairs of a hash; empty when the key is absent.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] on driver failure.
    fn get_all(&self, key: &str) -> Result<Vec<(String, String)>>;

    /// Atomically: if the hash's [`COMMIT_FIELD`] equals `expected_commit`
    /// (`None` = absent), apply `deletes` then `sets` and return `true`;
    /// otherwise change nothing and return `false`.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] on driver failure.
    fn swap(
        &self,
        key: &str,
        expected_commit: Option<&str>,
        sets: Vec<(String, String)>,
        deletes: Vec<String>,
    ) -> Result<bool>;

    /// Broadcast `payload` to every subscriber of `channel`, this process
    /// included.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] on driver failure.
    fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Register a listener for `channel` payloads.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] on driver failure.
    fn subscribe(&self, channel: &str, listener: Box<dyn Fn(&str) + Send + Sync>) -> Result<()>;
}

// -----------------------------------------------------------------------------
// Field and value codec
// -----------------------------------------------------------------------------

pub(crate) fn override_field<T: TierAxis, D: DataCenterAxis>(
    tier: T,
    ov: &OverrideValue<D>,
) -> String {
    match ov.sub_app_id {
        Some(sub_app) => format!(
            ":{}:{}:{};{}",
            tier.ordinal(),
            ov.data_center.ordinal(),
            sub_app,
            ov.name
        ),
        None => format!(
            ":{}:{};{}",
            tier.ordinal(),
            ov.data_center.ordinal(),
            ov.name
        ),
    }
}

/// Parse an override field for `tier`. Returns `None` for non-override
/// fields and for overrides belonging to a different tier.
pub(crate) fn parse_override_field<T: TierAxis, D: DataCenterAxis>(
    field: &str,
    tier: T,
) -> Result<Option<(String, D, Option<i32>)>> {
    let Some(body) = field.strip_prefix(':') else {
        return Ok(None);
    };
    let (axes, name) = body
        .split_once(';')
        .ok_or_else(|| Error::CorruptState(format!("malformed override field: {field:?}")))?;

    let parts: Vec<&str> = axes.split(':').collect();
    if parts.len() != 2 && parts.len() != 3 {
        return Err(Error::CorruptState(format!(
            "malformed override field: {field:?}"
        )));
    }

    let bad_ordinal =
        |what: &str| Error::CorruptState(format!("bad {what} ordinal in field: {field:?}"));
    let tier_ordinal: u32 = parts[0].parse().map_err(|_| bad_ordinal("tier"))?;
    if tier_ordinal != tier.ordinal() {
        return Ok(None);
    }

    let dc_ordinal: u32 = parts[1].parse().map_err(|_| bad_ordinal("data center"))?;
    let data_center = D::from_ordinal(dc_ordinal).ok_or_else(|| bad_ordinal("data center"))?;

    let sub_app_id = match parts.get(2) {
        Some(raw) => Some(raw.parse::<i32>().map_err(|_| bad_ordinal("sub-app"))?),
        None => None,
    };

    Ok(Some((name.to_string(), data_center, sub_app_id)))
}

pub(crate) fn encode_value<D: DataCenterAxis>(ov: &OverrideValue<D>) -> String {
    match ov.expires_at {
        Some(at) => format!("@{}|{}", at.unix_timestamp_nanos() / 1_000_000, ov.value),
        None if ov.value.starts_with('@') => format!("@|{}", ov.value),
        None => ov.value.clone(),
    }
}

pub(crate) fn decode_value(raw: &str) -> Result<(String, Option<OffsetDateTime>)> {
    let Some(framed) = raw.strip_prefix('@') else {
        return Ok((raw.to_string(), None));
    };
    let (millis, value) = framed
        .split_once('|')
        .ok_or_else(|| Error::CorruptState(format!("malformed value frame: {raw:?}")))?;
    if millis.is_empty() {
        return Ok((value.to_string(), None));
    }
    let millis: i128 = millis
        .parse()
        .map_err(|_| Error::CorruptState(format!("bad expiry in value frame: {raw:?}")))?;
    let expires_at = OffsetDateTime::from_unix_timestamp_nanos(millis * 1_000_000)
        .map_err(|_| Error::CorruptState(format!("expiry out of range: {raw:?}")))?;
    Ok((value.to_string(), Some(expires_at)))
}

impl<Tr: HashTransport> HashTransport for Arc<Tr> {
    fn get_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        (**self).get_all(key)
    }

    fn swap(
        &self,
        key: &str,
        expected_commit: Option<&str>,
        sets: Vec<(String, String)>,
        deletes: Vec<String>,
    ) -> Result<bool> {
        (**self).swap(key, expected_commit, sets, deletes)
    }

    fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        (**self).publish(channel, payload)
    }

    fn subscribe(&self, channel: &str, listener: Box<dyn Fn(&str) + Send + Sync>) -> Result<()> {
        (**self).subscribe(channel, listener)
    }
}

// -----------------------------------------------------------------------------
// Backend
// -----------------------------------------------------------------------------

/// [`StoreBackend`] over a [`HashTransport`].
pub struct HashBackend<T: TierAxis, D: DataCenterAxis, Tr: HashTransport> {
    transport: Tr,
    tier: T,
    _dc: PhantomData<fn() -> D>,
}

impl<T: TierAxis, D: DataCenterAxis, Tr: HashTransport> HashBackend<T, D, Tr> {
    /// Bind a backend to its transport and current tier.
    pub fn new(transport: Tr, tier: T) -> Self {
        Self {
            transport,
            tier,
            _dc: PhantomData,
        }
    }

    fn parse_snapshot(&self, app_name: &str, fields: &[(String, String)]) -> Result<Snapshot<D>> {
        let mut commit = None;
        let mut last_event: Option<Event<D>> = None;
        let mut overrides = Vec::new();

        for (field, value) in fields {
            if field == COMMIT_FIELD {
                commit = Some(value.as_str().into());
            } else if field == LAST_EVENT_FIELD {
                last_event = Some(serde_json::from_str(value).map_err(|e| {
                    Error::CorruptState(format!("unreadable {LAST_EVENT_FIELD}: {e}"))
                })?);
            } else if let Some((name, data_center, sub_app_id)) =
                parse_override_field::<T, D>(field, self.tier)?
            {
                let (raw, expires_at) = decode_value(value)?;
                overrides.push(OverrideValue {
                    name,
                    value: raw,
                    sub_app_id,
                    data_center,
                    expires_at,
                });
            }
        }

        let commit =
            commit.ok_or_else(|| Error::CorruptState(format!("{COMMIT_FIELD} missing")))?;
        Ok(Snapshot {
            app_name: app_name.to_string(),
            commit,
            overrides: ListBySetting::new(overrides),
            last_event,
        })
    }

    fn own_override_fields(&self, fields: &[(String, String)]) -> Result<Vec<String>> {
        let mut own = Vec::new();
        for (field, _) in fields {
            if parse_override_field::<T, D>(field, self.tier)?.is_some() {
                own.push(field.clone());
            }
        }
        Ok(own)
    }

    fn fields_for(&self, snapshot: &Snapshot<D>) -> Result<Vec<(String, String)>> {
        let mut sets = Vec::with_capacity(snapshot.overrides.len() + 2);
        for ov in &snapshot.overrides {
            sets.push((override_field(self.tier, ov), encode_value(ov)));
        }
        sets.push((COMMIT_FIELD.to_string(), snapshot.commit.as_str().to_string()));
        if let Some(event) = &snapshot.last_event {
            let json = serde_json::to_string(event)
                .map_err(|e| Error::CorruptState(format!("unserializable event: {e}")))?;
            sets.push((LAST_EVENT_FIELD.to_string(), json));
        }
        Ok(sets)
    }
}

impl<T: TierAxis, D: DataCenterAxis, Tr: HashTransport> StoreBackend<D>
    for HashBackend<T, D, Tr>
{
    fn load(&self, app_name: &str) -> Result<Option<Snapshot<D>>> {
        let fields = self.transport.get_all(app_name)?;
        if fields.is_empty() {
            return Ok(None);
        }
        self.parse_snapshot(app_name, &fields).map(Some)
    }

    fn transact(&self, app_name: &str, mutate: MutateFn<'_, D>) -> Result<Option<Snapshot<D>>> {
        // WATCH-style optimistic loop: re-read and re-apply until the swap
        // lands or the mutation declines.
        loop {
            let fields = self.transport.get_all(app_name)?;
            let current = if fields.is_empty() {
                None
            } else {
                Some(self.parse_snapshot(app_name, &fields)?)
            };
            let empty;
            let current_ref = match &current {
                Some(snapshot) => snapshot,
                None => {
                    empty = Snapshot::empty(app_name);
                    &empty
                }
            };

            let Some(next) = mutate(current_ref)? else {
                return Ok(None);
            };

            let sets = self.fields_for(&next)?;
            let kept: Vec<&str> = sets.iter().map(|(f, _)| f.as_str()).collect();
            let deletes: Vec<String> = self
                .own_override_fields(&fields)?
                .into_iter()
                .filter(|f| !kept.contains(&f.as_str()))
                .collect();

            let expected = current.as_ref().map(|s| s.commit.as_str().to_string());
            if self
                .transport
                .swap(app_name, expected.as_deref(), sets, deletes)?
            {
                self.transport.publish(UPDATE_CHANNEL, app_name)?;
                return Ok(Some(next));
            }
            // Lost a race with a concurrent writer; retry on fresh state.
        }
    }

    fn on_change(&self, listener: ChangeListener) -> Result<()> {
        self.transport
            .subscribe(UPDATE_CHANNEL, Box::new(move |payload| listener(payload)))
    }
}

// -----------------------------------------------------------------------------
// In-process transport
// -----------------------------------------------------------------------------

type Subscriber = Arc<dyn Fn(&str) + Send + Sync>;

/// In-process [`HashTransport`] reference implementation.
pub struct MemoryHashTransport {
    hashes: DashMap<String, HashMap<String, String>>,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl MemoryHashTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            hashes: DashMap::new(),
            subscribers: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryHashTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HashTransport for MemoryHashTransport {
    fn get_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        Ok(self
            .hashes
            .get(key)
            .map(|hash| hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn swap(
        &self,
        key: &str,
        expected_commit: Option<&str>,
        sets: Vec<(String, String)>,
        deletes: Vec<String>,
    ) -> Result<bool> {
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        if hash.get(COMMIT_FIELD).map(String::as_str) != expected_commit {
            return Ok(false);
        }
        for field in deletes {
            hash.remove(&field);
        }
        for (field, value) in sets {
            hash.insert(field, value);
        }
        Ok(true)
    }

    fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let listeners: Vec<Subscriber> = self
            .subscribers
            .read()
            .get(channel)
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener(payload);
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str, listener: Box<dyn Fn(&str) + Send + Sync>) -> Result<()> {
        self.subscribers
            .write()
            .entry(channel.to_string())
            .or_default()
            .push(listener.into());
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
