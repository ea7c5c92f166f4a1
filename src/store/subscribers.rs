//! Subscription registry and cached deliveries
//!
//! One cached `(commit, settings)` pair is kept per subscription. The
//! registry lock is held only to mutate or snapshot the subscriber list,
//! never during callback dispatch; each subscription's own mutex serializes
//! refresh-and-deliver, so a callback sees at most one in-flight delivery
//! and notifications arrive in commit order per subscription.

use crate::error::Result;
use crate::resolve::Resolved;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Callback receiving each materialized refresh, or the error that kept one
/// from materializing.
pub type UpdateCallback<S> = Box<dyn Fn(Result<Resolved<S>>) + Send + Sync>;

pub(crate) struct SubscriptionInner<S> {
    pub id: u64,
    pub app_name: String,
    pub sub_app_id: Option<i32>,
    pub callback: UpdateCallback<S>,
    /// Serializes refresh + dispatch; holds the cached last delivery.
    pub state: Mutex<Option<Resolved<S>>>,
    pub cancelled: Arc<AtomicBool>,
}

pub(crate) struct SubscriberRegistry<S> {
    subscriptions: RwLock<Vec<Arc<SubscriptionInner<S>>>>,
    next_id: AtomicU64,
}

impl<S> SubscriberRegistry<S> {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn insert(
        &self,
        app_name: &str,
        sub_app_id: Option<i32>,
        callback: UpdateCallback<S>,
    ) -> Arc<SubscriptionInner<S>> {
        let inner = Arc::new(SubscriptionInner {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            app_name: app_name.to_string(),
            sub_app_id,
            callback,
            state: Mutex::new(None),
            cancelled: Arc::new(AtomicBool::new(false)),
        });
        self.subscriptions.write().push(Arc::clone(&inner));
        inner
    }

    pub fn remove(&self, id: u64) {
        self.subscriptions.write().retain(|s| s.id != id);
    }

    /// Clone the subscriptions watching `app_name`; dispatch happens after
    /// the lock is released.
    pub fn matching(&self, app_name: &str) -> Vec<Arc<SubscriptionInner<S>>> {
        self.subscriptions
            .read()
            .iter()
            .filter(|s| s.app_name == app_name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }
}

/// Handle to one active subscription.
///
/// Dropping the handle does not end the subscription; call
/// [`cancel`](Subscription::cancel). This is the only back-reference out of
/// a callback's lifecycle, so callbacks themselves never own the store.
pub struct Subscription {
    id: u64,
    cancelled: Arc<AtomicBool>,
    remove: Box<dyn Fn(u64) + Send + Sync>,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        cancelled: Arc<AtomicBool>,
        remove: Box<dyn Fn(u64) + Send + Sync>,
    ) -> Self {
        Self {
            id,
            cancelled,
            remove,
        }
    }

    /// Stop deliveries and unregister. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        (self.remove)(self.id);
    }

    /// Whether [`cancel`](Subscription::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
