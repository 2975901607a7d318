//! ResourceClass — per-item-type scope bundling the shared store and event
//! bus, with ingest entry points for transport push messages.
//!
//! A transport collaborator decodes wire messages into items and feeds them
//! through `ingest_*`. Each ingest applies the mutation to the store first,
//! then emits the corresponding [`ItemEvent`] so every listener observes the
//! already-merged value.

use std::sync::Arc;

use crate::bus::{EventBus, EventKind, ItemEvent};
use crate::store::{ItemStore, UpdateOutcome, Upsert};
use crate::types::{ChannelId, Resource};

pub struct ResourceClass<I: Resource> {
    store: Arc<ItemStore<I>>,
    bus: Arc<EventBus<I>>,
}

impl<I: Resource> ResourceClass<I> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            store: Arc::new(ItemStore::new()),
            bus: Arc::new(EventBus::new()),
        })
    }

    pub fn store(&self) -> &Arc<ItemStore<I>> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus<I>> {
        &self.bus
    }

    /// A create message arrived on `channel`.
    ///
    /// If the item is already stored the message degrades to an update
    /// (create/update races on the wire are routine).
    pub fn ingest_create(&self, payload: I, channel: Option<ChannelId>) {
        match self.store.upsert(payload) {
            Upsert::Created(item) => {
                self.bus.emit(&ItemEvent {
                    kind: EventKind::Create,
                    item,
                    previous: None,
                    channel,
                });
            }
            Upsert::Updated { item, previous } => {
                self.bus.emit(&ItemEvent {
                    kind: EventKind::Update,
                    item,
                    previous: Some(previous),
                    channel,
                });
            }
            Upsert::Stale(_) => {}
        }
    }

    /// An update message arrived on `channel`. Updates for items not yet
    /// stored are queued inside the store and replayed on creation.
    pub fn ingest_update(&self, payload: I, channel: Option<ChannelId>) {
        match self.store.update(payload) {
            UpdateOutcome::Updated { item, previous } => {
                self.bus.emit(&ItemEvent {
                    kind: EventKind::Update,
                    item,
                    previous: Some(previous),
                    channel,
                });
            }
            UpdateOutcome::Stale(_) | UpdateOutcome::Queued => {}
        }
    }

    /// A delete message arrived on `channel`. Deleting an unknown key is a
    /// no-op with no event.
    pub fn ingest_delete(&self, key: &str, channel: Option<ChannelId>) {
        if let Some(item) = self.store.remove(key) {
            self.bus.emit(&ItemEvent {
                kind: EventKind::Delete,
                item,
                previous: None,
                channel,
            });
        }
    }
}
