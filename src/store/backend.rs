//! Snapshot persistence backends

use crate::axes::DataCenterAxis;
use crate::error::Result;
use crate::snapshot::Snapshot;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Invoked with the app name after every committed mutation.
pub type ChangeListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Mutation closure handed to [`StoreBackend::transact`]: receives the
/// current snapshot and returns the replacement, or `None` to commit
/// nothing. May run more than once when the backend retries a lost race.
pub type MutateFn<'a, D> = &'a mut dyn FnMut(&Snapshot<D>) -> Result<Option<Snapshot<D>>>;

/// Persistence contract of the override store.
///
/// A backend owns `app name → snapshot` and guarantees that `transact`
/// executes its read-modify-write atomically per app. After every commit it
/// notifies registered change listeners — for a shared backend, commits made
/// by other processes included.
pub trait StoreBackend<D: DataCenterAxis>: Send + Sync + 'static {
    /// Load the current snapshot, or `None` for an app with no state.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`](crate::Error::Transport) on driver failure,
    /// [`Error::CorruptState`](crate::Error::CorruptState) when the
    /// persisted form cannot be parsed.
    fn load(&self, app_name: &str) -> Result<Option<Snapshot<D>>>;

    /// Atomically replace an app's snapshot.
    ///
    /// Returns the committed snapshot, or `None` when `mutate` declined to
    /// commit. A failed mutation must leave the stored state untouched.
    ///
    /// # Errors
    ///
    /// Propagates `mutate` errors and driver failures.
    fn transact(&self, app_name: &str, mutate: MutateFn<'_, D>) -> Result<Option<Snapshot<D>>>;

    /// Register a commit listener.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`](crate::Error::Transport) when the backend's
    /// notification channel cannot be established.
    fn on_change(&self, listener: ChangeListener) -> Result<()>;
}

/// In-memory reference backend.
///
/// Snapshots live in a concurrent map; the entry guard makes the
/// read-modify-write of `transact` exclusive per app while reads stay
/// lock-free on other apps.
pub struct MemoryBackend<D: DataCenterAxis> {
    apps: DashMap<String, Snapshot<D>>,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl<D: DataCenterAxis> MemoryBackend<D> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            apps: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    fn notify(&self, app_name: &str) {
        // Snapshot the listener list; never dispatch under the lock.
        let listeners: Vec<ChangeListener> = self.listeners.read().clone();
        for listener in listeners {
            listener(app_name);
        }
    }
}

impl<D: DataCenterAxis> Default for MemoryBackend<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DataCenterAxis> StoreBackend<D> for MemoryBackend<D> {
    fn load(&self, app_name: &str) -> Result<Option<Snapshot<D>>> {
        Ok(self.apps.get(app_name).map(|entry| entry.value().clone()))
    }

    fn transact(&self, app_name: &str, mutate: MutateFn<'_, D>) -> Result<Option<Snapshot<D>>> {
        let committed = {
            let mut entry = self
                .apps
                .entry(app_name.to_string())
                .or_insert_with(|| Snapshot::empty(app_name));
            match mutate(entry.value())? {
                Some(snapshot) => {
                    *entry.value_mut() = snapshot.clone();
                    Some(snapshot)
                }
                None => None,
            }
        };

        if committed.is_some() {
            self.notify(app_name);
        }
        Ok(committed)
    }

    fn on_change(&self, listener: ChangeListener) -> Result<()> {
        self.listeners.write().push(listener);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Commit, OverrideValue};
    use crate::by_setting::ListBySetting;
    use std::sync::atomic::{AtomicUsize, Ordering};

    crate::axis_enum! {
        data_center enum Dc { Any, East }
    }

    fn snapshot_with(app: &str, value: &str) -> Snapshot<Dc> {
        Snapshot {
            app_name: app.into(),
            commit: Commit::mint(),
            overrides: ListBySetting::new(vec![OverrideValue::new("X", value, Dc::Any)]),
            last_event: None,
        }
    }

    #[test]
    fn test_load_absent_app() {
        let backend = MemoryBackend::<Dc>::new();
        assert!(backend.load("nope").unwrap().is_none());
    }

    #[test]
    fn test_transact_commits_and_notifies() {
        let backend = MemoryBackend::<Dc>::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        backend
            .on_change(Arc::new(move |app| {
                assert_eq!(app, "app");
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        let committed = backend
            .transact("app", &mut |current| {
                assert!(current.commit.is_initial());
                Ok(Some(snapshot_with("app", "1")))
            })
            .unwrap();
        assert!(committed.is_some());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let loaded = backend.load("app").unwrap().unwrap();
        assert_eq!(loaded.overrides.get_all("X")[0].value, "1");
    }

    #[test]
    fn test_declined_mutation_changes_nothing() {
        let backend = MemoryBackend::<Dc>::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        backend
            .on_change(Arc::new(move |_| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        let result = backend.transact("app", &mut |_| Ok(None)).unwrap();
        assert!(result.is_none());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
