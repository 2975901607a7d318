//! EventBus — per-item-type pub/sub for channel events.
//!
//! Class-level mutable callback registries are a cross-talk hazard, so the
//! bus is an explicit object scoped per item type, with handle-based
//! registration and removal. Snapshot-on-emit semantics:
//!   - A listener removed during emission is still called in that round.
//!   - A listener added during emission is NOT called until the next emit.
//!
//! The internal lock is released before any callback runs, so listeners can
//! freely add or remove callbacks (including themselves).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{ChannelId, ItemRef, Resource};

/// Kind of a delivered channel event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

/// A create/update/delete event delivered to class-wide listeners.
pub struct ItemEvent<I: Resource> {
    pub kind: EventKind,
    /// The affected item's slot. For deletes, the slot already removed from
    /// the store.
    pub item: ItemRef<I>,
    /// Pre-change copy, present for updates.
    pub previous: Option<I>,
    /// The originating subscription channel, when the transport knows it.
    pub channel: Option<ChannelId>,
}

/// Returned by [`EventBus::add_channel_callback`]; identifies one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackHandle {
    kind: EventKind,
    id: u64,
}

type Listener<I> = Arc<dyn Fn(&ItemEvent<I>) + Send + Sync>;

struct BusInner<I: Resource> {
    create: Vec<(u64, Listener<I>)>,
    update: Vec<(u64, Listener<I>)>,
    delete: Vec<(u64, Listener<I>)>,
}

impl<I: Resource> BusInner<I> {
    fn slot(&mut self, kind: EventKind) -> &mut Vec<(u64, Listener<I>)> {
        match kind {
            EventKind::Create => &mut self.create,
            EventKind::Update => &mut self.update,
            EventKind::Delete => &mut self.delete,
        }
    }
}

/// Typed synchronous event bus, one per item class.
pub struct EventBus<I: Resource> {
    inner: Mutex<BusInner<I>>,
    next_id: AtomicU64,
}

impl<I: Resource> EventBus<I> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                create: Vec::new(),
                update: Vec::new(),
                delete: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `callback` for events of `kind`.
    pub fn add_channel_callback(
        &self,
        kind: EventKind,
        callback: impl Fn(&ItemEvent<I>) + Send + Sync + 'static,
    ) -> CallbackHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().slot(kind).push((id, Arc::new(callback)));
        CallbackHandle { kind, id }
    }

    /// Remove the listener behind `handle`. Safe to call more than once.
    pub fn remove_channel_callback(&self, handle: CallbackHandle) {
        self.inner
            .lock()
            .slot(handle.kind)
            .retain(|(id, _)| *id != handle.id);
    }

    /// Emit `event` to all listeners registered for its kind.
    pub fn emit(&self, event: &ItemEvent<I>) {
        let snapshot: Vec<Listener<I>> = {
            let mut inner = self.inner.lock();
            inner
                .slot(event.kind)
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect()
        };
        for cb in snapshot {
            cb(event);
        }
    }

    /// Number of listeners registered for `kind`.
    pub fn size(&self, kind: EventKind) -> usize {
        self.inner.lock().slot(kind).len()
    }
}

impl<I: Resource> Default for EventBus<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// The sole cross-talk guard between independently filtered lists of the
/// same item class: a listener must skip an event whose channel is defined
/// and differs from its own.
pub fn should_ignore_callback(own: Option<ChannelId>, event_channel: Option<ChannelId>) -> bool {
    match (own, event_channel) {
        (Some(own), Some(from)) => own != from,
        (None, Some(_)) => true,
        (_, None) => false,
    }
}
