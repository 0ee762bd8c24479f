//! Ordered list of identity observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::models::UserProfile;

type Callback = Arc<dyn Fn(Option<&UserProfile>) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: AtomicU64,
    entries: Mutex<Vec<(SubscriptionId, Callback)>>,
}

impl Subscribers {
    pub(crate) fn add<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Option<&UserProfile>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(callback)));
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Deliver `user` to every subscriber in registration order.
    /// Callbacks run on a snapshot, outside the lock, so they may
    /// subscribe, unsubscribe or read the session themselves.
    pub(crate) fn notify(&self, user: Option<&UserProfile>) {
        let snapshot: Vec<Callback> = self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in snapshot {
            callback(user);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Callback)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
