//! ItemStore — identity-preserving keyed storage for domain items.
//!
//! Each item lives in a shared slot ([`ItemRef`]); an upsert writes through
//! the existing slot so that references held by live lists stay valid and
//! observe the new value in place. Updates arriving before their item is
//! stored are queued and replayed in version order on creation.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::filter::Filter;
use crate::types::{item_ref, ItemRef, Resource};

/// Outcome of [`ItemStore::upsert`].
pub enum Upsert<I: Resource> {
    /// A new slot was created.
    Created(ItemRef<I>),
    /// An existing slot was overwritten; `previous` is the pre-change copy.
    Updated { item: ItemRef<I>, previous: I },
    /// The incoming value was strictly older than the stored one.
    Stale(ItemRef<I>),
}

impl<I: Resource> Upsert<I> {
    /// The slot the item lives in, whatever happened to its content.
    pub fn into_item(self) -> ItemRef<I> {
        match self {
            Upsert::Created(r) | Upsert::Stale(r) => r,
            Upsert::Updated { item, .. } => item,
        }
    }
}

/// Outcome of [`ItemStore::update`] (merge-only, no insert).
pub enum UpdateOutcome<I: Resource> {
    Updated { item: ItemRef<I>, previous: I },
    /// The incoming value was strictly older than the stored one.
    Stale(ItemRef<I>),
    /// No slot for this key yet; the payload was queued and will be replayed
    /// when the item is created.
    Queued,
}

struct StoreInner<I: Resource> {
    slots: HashMap<String, ItemRef<I>>,
    /// Updates received before their item was stored, keyed by primary key.
    unapplied: HashMap<String, Vec<I>>,
}

/// Keyed storage with slot-preserving replacement.
pub struct ItemStore<I: Resource> {
    inner: Mutex<StoreInner<I>>,
}

impl<I: Resource> ItemStore<I> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                slots: HashMap::new(),
                unapplied: HashMap::new(),
            }),
        }
    }

    /// Insert or replace by primary key, preserving the slot.
    ///
    /// A value whose `version_key` is strictly older than the stored one is
    /// discarded. On creation, queued unapplied updates for the key are
    /// replayed in version order.
    pub fn upsert(&self, item: I) -> Upsert<I> {
        let key = item.primary_key();
        let mut inner = self.inner.lock();

        if let Some(slot) = inner.slots.get(&key).cloned() {
            let mut guard = slot.write();
            if is_stale(&*guard, &item) {
                tracing::debug!(%key, "discarding stale upsert");
                drop(guard);
                return Upsert::Stale(slot);
            }
            let previous = guard.clone();
            *guard = item;
            drop(guard);
            return Upsert::Updated {
                item: slot,
                previous,
            };
        }

        let slot = item_ref(item);
        inner.slots.insert(key.clone(), slot.clone());

        if let Some(mut queue) = inner.unapplied.remove(&key) {
            queue.sort_by_key(|u| u.version_key());
            let mut guard = slot.write();
            for update in queue {
                if !is_stale(&*guard, &update) {
                    *guard = update;
                }
            }
        }

        Upsert::Created(slot)
    }

    /// Merge an update into an existing slot. If the item is not stored yet
    /// the payload is queued for replay on creation.
    pub fn update(&self, item: I) -> UpdateOutcome<I> {
        let key = item.primary_key();
        let mut inner = self.inner.lock();

        match inner.slots.get(&key).cloned() {
            Some(slot) => {
                let mut guard = slot.write();
                if is_stale(&*guard, &item) {
                    tracing::debug!(%key, "discarding stale update");
                    drop(guard);
                    UpdateOutcome::Stale(slot)
                } else {
                    let previous = guard.clone();
                    *guard = item;
                    drop(guard);
                    UpdateOutcome::Updated {
                        item: slot,
                        previous,
                    }
                }
            }
            None => {
                inner.unapplied.entry(key).or_default().push(item);
                UpdateOutcome::Queued
            }
        }
    }

    /// Remove by primary key. Absence is not an error.
    pub fn remove(&self, key: &str) -> Option<ItemRef<I>> {
        let mut inner = self.inner.lock();
        inner.unapplied.remove(key);
        inner.slots.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<ItemRef<I>> {
        self.inner.lock().slots.get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.lock().slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().slots.is_empty()
    }

    /// All stored item references, in no particular order.
    pub fn all(&self) -> Vec<ItemRef<I>> {
        self.inner.lock().slots.values().cloned().collect()
    }

    /// References of items satisfying `filter`.
    pub fn where_matches(&self, filter: &Filter) -> Vec<ItemRef<I>> {
        self.inner
            .lock()
            .slots
            .values()
            .filter(|slot| filter.matches(&*slot.read()))
            .cloned()
            .collect()
    }

    /// First item satisfying `filter`, if any.
    pub fn find_by(&self, filter: &Filter) -> Option<ItemRef<I>> {
        self.inner
            .lock()
            .slots
            .values()
            .find(|slot| filter.matches(&*slot.read()))
            .cloned()
    }

    /// Drop every slot and queued update.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
        inner.unapplied.clear();
    }
}

impl<I: Resource> Default for ItemStore<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// An incoming value is stale only when both sides carry a version and the
/// incoming one is strictly older. Equal versions are applied (redelivery of
/// the same version is harmless and common).
fn is_stale<I: Resource>(stored: &I, incoming: &I) -> bool {
    match (stored.version_key(), incoming.version_key()) {
        (Some(stored_v), Some(incoming_v)) => incoming_v < stored_v,
        _ => false,
    }
}
