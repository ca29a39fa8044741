use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

struct Slot<V> {
    order: u64,
    value: V,
}

/// Name-keyed concurrent map that remembers first-registration order.
///
/// Re-registering a name replaces its value but keeps its position.
pub(crate) struct OrderedRegistry<V> {
    slots: DashMap<String, Slot<V>>,
    next_order: AtomicU64,
}

impl<V: Clone> OrderedRegistry<V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: DashMap::new(),
            next_order: AtomicU64::new(0),
        }
    }

    /// Binds `key` to `value`; returns true when an earlier binding was replaced.
    pub(crate) fn insert(&self, key: String, value: V) -> bool {
        match self.slots.entry(key) {
            Entry::Occupied(mut slot) => {
                slot.get_mut().value = value;
                true
            }
            Entry::Vacant(slot) => {
                let order = self.next_order.fetch_add(1, Ordering::Relaxed);
                slot.insert(Slot { order, value });
                false
            }
        }
    }

    /// Clones the value out so no shard guard outlives the call.
    pub(crate) fn get(&self, key: &str) -> Option<V> {
        self.slots.get(key).map(|slot| slot.value.clone())
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Keys in first-registration order.
    pub(crate) fn keys(&self) -> Vec<String> {
        let mut keyed: Vec<(u64, String)> = self
            .slots
            .iter()
            .map(|slot| (slot.order, slot.key().clone()))
            .collect();
        keyed.sort_by_key(|(order, _)| *order);
        keyed.into_iter().map(|(_, key)| key).collect()
    }
}

impl<V: Clone> Default for OrderedRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}
