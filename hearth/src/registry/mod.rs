//! Callback registries
//!
//! Observers, event subscribers and release callbacks all live in a
//! [`SubscriberSet`]: an ordered map from a key (usually the emitting
//! entity) to the callbacks registered against it. Each entry also records
//! the entity that owns it, so the entries of a released owner can be
//! discarded without waiting for the key to dispatch again.
//!
//! - entries are ordered by [`SubscriptionId`], which is registration order
//! - dispatch works on a snapshot, so callbacks may register or drop
//!   subscriptions on the key being dispatched without affecting that pass
//! - removed callbacks are dropped only after the registry borrow ends,
//!   so a callback that owns a `Subscription` can be removed safely

mod subscription;

pub use subscription::Subscription;

use hearth_types::{EntityId, SubscriptionId};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// A callback shared between the registry and an in-flight dispatch
pub(crate) type SharedCallback<C> = Rc<RefCell<C>>;

struct Entry<C> {
    owner: EntityId,
    callback: SharedCallback<C>,
}

pub(crate) struct SubscriberSet<K, C>(Rc<RefCell<SubscriberSetState<K, C>>>);

struct SubscriberSetState<K, C> {
    subscribers: BTreeMap<K, BTreeMap<SubscriptionId, Entry<C>>>,
}

impl<K, C> SubscriberSetState<K, C>
where
    K: Ord,
{
    fn remove(&mut self, key: &K, id: SubscriptionId) -> Option<Entry<C>> {
        let entries = self.subscribers.get_mut(key)?;
        let removed = entries.remove(&id);
        if entries.is_empty() {
            self.subscribers.remove(key);
        }
        removed
    }
}

impl<K, C> Default for SubscriberSet<K, C> {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(SubscriberSetState {
            subscribers: BTreeMap::new(),
        })))
    }
}

impl<K, C> SubscriberSet<K, C>
where
    K: Ord + Clone + 'static,
    C: 'static,
{
    /// Register `callback` under `key` on behalf of `owner`
    ///
    /// The returned subscription removes the entry when dropped. If the
    /// entry was discarded in the meantime, dropping is a no-op.
    pub(crate) fn insert(&self, key: K, owner: EntityId, callback: C) -> Subscription {
        let id = SubscriptionId::new();
        self.0
            .borrow_mut()
            .subscribers
            .entry(key.clone())
            .or_default()
            .insert(
                id,
                Entry {
                    owner,
                    callback: Rc::new(RefCell::new(callback)),
                },
            );

        let state = Rc::downgrade(&self.0);
        Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                let removed = state.borrow_mut().remove(&key, id);
                drop(removed);
            }
        })
    }

    /// Callbacks currently registered under `key`, in registration order
    pub(crate) fn snapshot(&self, key: &K) -> Vec<(SubscriptionId, SharedCallback<C>)> {
        self.0
            .borrow()
            .subscribers
            .get(key)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(id, entry)| (*id, entry.callback.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove one entry; returns whether it was present
    pub(crate) fn remove(&self, key: &K, id: SubscriptionId) -> bool {
        let removed = self.0.borrow_mut().remove(key, id);
        removed.is_some()
    }

    /// Remove every entry under `key`, returning the callbacks in order
    ///
    /// Callbacks still shared with an in-flight dispatch are dropped
    /// instead of returned.
    pub(crate) fn take(&self, key: &K) -> Vec<C> {
        let removed = self.0.borrow_mut().subscribers.remove(key);
        removed
            .into_iter()
            .flat_map(BTreeMap::into_values)
            .filter_map(|entry| Rc::try_unwrap(entry.callback).ok())
            .map(RefCell::into_inner)
            .collect()
    }

    /// Remove every entry whose key matches `predicate`; returns how many
    pub(crate) fn remove_where(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let removed: Vec<BTreeMap<SubscriptionId, Entry<C>>> = {
            let mut state = self.0.borrow_mut();
            let keys: Vec<K> = state
                .subscribers
                .keys()
                .filter(|key| predicate(key))
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|key| state.subscribers.remove(key))
                .collect()
        };
        removed.iter().map(BTreeMap::len).sum()
    }

    /// Remove every entry registered by `owner`, under any key; returns how many
    pub(crate) fn remove_owned_by(&self, owner: EntityId) -> usize {
        let removed: Vec<Entry<C>> = {
            let mut state = self.0.borrow_mut();
            let mut removed = Vec::new();
            state.subscribers.retain(|_, entries| {
                let owned: Vec<SubscriptionId> = entries
                    .iter()
                    .filter(|(_, entry)| entry.owner == owner)
                    .map(|(id, _)| *id)
                    .collect();
                removed.extend(owned.iter().filter_map(|id| entries.remove(id)));
                !entries.is_empty()
            });
            removed
        };
        removed.len()
    }

    /// Total number of entries across all keys
    pub(crate) fn len(&self) -> usize {
        self.0
            .borrow()
            .subscribers
            .values()
            .map(BTreeMap::len)
            .sum()
    }
}
