//! Audit logging of store mutations
//!
//! Every committed mutation is fanned out to registered [`EventLogger`]s as
//! `(event, snapshot)`. Logging is best-effort and must never block the
//! write path; failures are reported through a caller-provided error sink.
//!
//! [`MemoryEventLog`] is the reference logger: a bounded queue drained by a
//! background thread into an index that answers the two audit queries —
//! filtered, newest-first, paged event ranges, and snapshot lookup by
//! commit.

use crate::axes::DataCenterAxis;
use crate::error::Error;
use crate::snapshot::{Commit, Event, EventType, Snapshot};
use log::warn;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use time::OffsetDateTime;

/// Append-only sink for committed mutations.
pub trait EventLogger<D: DataCenterAxis>: Send + Sync {
    /// Record one mutation. Called on the mutating thread after the commit;
    /// implementations must hand the record off without blocking.
    fn log(&self, event: Event<D>, snapshot: Snapshot<D>);
}

/// Receives logging failures (queue overflow, worker gone).
pub type ErrorSink = Arc<dyn Fn(Error) + Send + Sync>;

/// Filter for [`MemoryEventLog::events`].
#[derive(Clone, Debug)]
pub struct LogQuery {
    app_name: Option<String>,
    setting_name: Option<String>,
    user: Option<String>,
    min_timestamp: Option<OffsetDateTime>,
    max_timestamp: Option<OffsetDateTime>,
    include_restores: bool,
    limit: Option<usize>,
    offset: usize,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            app_name: None,
            setting_name: None,
            user: None,
            min_timestamp: None,
            max_timestamp: None,
            include_restores: true,
            limit: None,
            offset: 0,
        }
    }
}

impl LogQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only events for this app.
    #[must_use]
    pub fn app(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// Only events touching this setting.
    #[must_use]
    pub fn setting(mut self, setting_name: impl Into<String>) -> Self {
        self.setting_name = Some(setting_name.into());
        self
    }

    /// Only events by this user.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Only events at or after this instant.
    #[must_use]
    pub fn since(mut self, min_timestamp: OffsetDateTime) -> Self {
        self.min_timestamp = Some(min_timestamp);
        self
    }

    /// Only events strictly before this instant.
    #[must_use]
    pub fn until(mut self, max_timestamp: OffsetDateTime) -> Self {
        self.max_timestamp = Some(max_timestamp);
        self
    }

    /// Whether restore events are included (default: yes).
    #[must_use]
    pub fn include_restores(mut self, include: bool) -> Self {
        self.include_restores = include;
        self
    }

    /// Page size.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Entries to skip from the newest end.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    fn matches<D: DataCenterAxis>(&self, event: &Event<D>) -> bool {
        if let Some(app) = &self.app_name {
            if event.app_name != *app {
                return false;
            }
        }
        if let Some(setting) = &self.setting_name {
            if event.setting_name.as_deref() != Some(setting.as_str()) {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if event.user != *user {
                return false;
            }
        }
        if let Some(min) = self.min_timestamp {
            if event.timestamp < min {
                return false;
            }
        }
        if let Some(max) = self.max_timestamp {
            if event.timestamp >= max {
                return false;
            }
        }
        if !self.include_restores && event.event_type == EventType::RestoreSnapshot {
            return false;
        }
        true
    }
}

struct LogState<D: DataCenterAxis> {
    events: RwLock<Vec<Event<D>>>,
    snapshots: RwLock<HashMap<Commit, Snapshot<D>>>,
}

const QUEUE_DEPTH: usize = 1024;

/// In-memory reference logger with a background indexing thread.
pub struct MemoryEventLog<D: DataCenterAxis> {
    state: Arc<LogState<D>>,
    sender: mpsc::SyncSender<(Event<D>, Snapshot<D>)>,
    pending: Arc<AtomicUsize>,
    error_sink: ErrorSink,
}

impl<D: DataCenterAxis> MemoryEventLog<D> {
    /// Create a logger reporting failures through the `log` facade.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_error_sink(Arc::new(|e| warn!("event log failure: {e}")))
    }

    /// Create a logger with a custom failure sink.
    #[must_use]
    pub fn with_error_sink(error_sink: ErrorSink) -> Arc<Self> {
        let state = Arc::new(LogState {
            events: RwLock::new(Vec::new()),
            snapshots: RwLock::new(HashMap::new()),
        });
        let pending = Arc::new(AtomicUsize::new(0));
        let (sender, receiver) = mpsc::sync_channel::<(Event<D>, Snapshot<D>)>(QUEUE_DEPTH);

        let worker_state = Arc::clone(&state);
        let worker_pending = Arc::clone(&pending);
        std::thread::spawn(move || {
            while let Ok((event, snapshot)) = receiver.recv() {
                worker_state
                    .snapshots
                    .write()
                    .insert(snapshot.commit.clone(), snapshot);
                worker_state.events.write().push(event);
                worker_pending.fetch_sub(1, Ordering::SeqCst);
            }
        });

        Arc::new(Self {
            state,
            sender,
            pending,
            error_sink,
        })
    }

    /// Wait until every accepted record has been indexed.
    pub fn flush(&self) {
        while self.pending.load(Ordering::SeqCst) > 0 {
            std::thread::yield_now();
        }
    }

    /// Events matching `query`, newest first.
    #[must_use]
    pub fn events(&self, query: &LogQuery) -> Vec<Event<D>> {
        let events = self.state.events.read();
        let hits = events.iter().rev().filter(|e| query.matches(e));
        match query.limit {
            Some(limit) => hits.skip(query.offset).take(limit).cloned().collect(),
            None => hits.skip(query.offset).cloned().collect(),
        }
    }

    /// The snapshot a commit produced, if it was logged.
    #[must_use]
    pub fn snapshot_for(&self, commit: &Commit) -> Option<Snapshot<D>> {
        self.state.snapshots.read().get(commit).cloned()
    }
}

impl<D: DataCenterAxis> EventLogger<D> for MemoryEventLog<D> {
    fn log(&self, event: Event<D>, snapshot: Snapshot<D>) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.sender.try_send((event, snapshot)) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            (self.error_sink)(Error::Transport(format!("event log queue rejected record: {e}")));
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::by_setting::ListBySetting;
    use time::macros::datetime;

    crate::axis_enum! {
        data_center enum Dc { Any, East }
    }

    fn record(log: &MemoryEventLog<Dc>, app: &str, setting: &str, user: &str, ts: OffsetDateTime) -> Commit {
        let commit = Commit::mint();
        let event = Event::set_override(app, setting, "v", Dc::Any, user, ts, commit.clone());
        let snapshot = Snapshot {
            app_name: app.into(),
            commit: commit.clone(),
            overrides: ListBySetting::empty(),
            last_event: Some(event.clone()),
        };
        log.log(event, snapshot);
        commit
    }

    #[test]
    fn test_range_query_newest_first() {
        let log = MemoryEventLog::<Dc>::new();
        record(&log, "app", "A", "alice", datetime!(2022-01-01 10:00 UTC));
        record(&log, "app", "B", "bob", datetime!(2022-01-01 11:00 UTC));
        record(&log, "other", "A", "alice", datetime!(2022-01-01 12:00 UTC));
        log.flush();

        let all = log.events(&LogQuery::new());
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].app_name, "other");

        let app_only = log.events(&LogQuery::new().app("app"));
        assert_eq!(app_only.len(), 2);
        assert_eq!(app_only[0].setting_name.as_deref(), Some("B"));

        let by_user = log.events(&LogQuery::new().user("alice"));
        assert_eq!(by_user.len(), 2);

        let windowed = log.events(
            &LogQuery::new()
                .since(datetime!(2022-01-01 10:30 UTC))
                .until(datetime!(2022-01-01 12:00 UTC)),
        );
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].setting_name.as_deref(), Some("B"));
    }

    #[test]
    fn test_paging() {
        let log = MemoryEventLog::<Dc>::new();
        for hour in 0..5 {
            record(
                &log,
                "app",
                "A",
                "alice",
                datetime!(2022-01-01 00:00 UTC) + time::Duration::hours(hour),
            );
        }
        log.flush();

        let page = log.events(&LogQuery::new().limit(2).offset(1));
        assert_eq!(page.len(), 2);
        let ts: Vec<OffsetDateTime> = page.iter().map(|e| e.timestamp).collect();
        assert_eq!(
            ts,
            vec![
                datetime!(2022-01-01 03:00 UTC),
                datetime!(2022-01-01 02:00 UTC),
            ]
        );
    }

    #[test]
    fn test_restore_filter_and_snapshot_lookup() {
        let log = MemoryEventLog::<Dc>::new();
        let set_commit = record(&log, "app", "A", "alice", datetime!(2022-02-01 00:00 UTC));

        let restore_commit = Commit::mint();
        let event = Event::restore(
            "app",
            set_commit.clone(),
            "bob",
            datetime!(2022-02-01 01:00 UTC),
            restore_commit.clone(),
        );
        let snapshot = Snapshot {
            app_name: "app".into(),
            commit: restore_commit.clone(),
            overrides: ListBySetting::empty(),
            last_event: Some(event.clone()),
        };
        log.log(event, snapshot);
        log.flush();

        assert_eq!(log.events(&LogQuery::new()).len(), 2);
        assert_eq!(log.events(&LogQuery::new().include_restores(false)).len(), 1);

        let stored = log.snapshot_for(&restore_commit).unwrap();
        assert_eq!(stored.commit, restore_commit);
        assert!(log.snapshot_for(&Commit::mint()).is_none());
    }
}
