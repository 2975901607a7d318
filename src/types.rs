//! Core item types: the `Resource` capability trait, shared item references,
//! and channel identity.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// Capability bound for domain items held in an [`crate::store::ItemStore`].
///
/// Implementations expose a stable primary key, an optional version marker
/// used to discard stale updates, and field access by name for filter
/// evaluation.
pub trait Resource: Clone + Send + Sync + 'static {
    /// Stable unique identifier of the item within its class.
    fn primary_key(&self) -> String;

    /// Monotonic-ish version marker. Items without one are always merged.
    fn version_key(&self) -> Option<u64> {
        None
    }

    /// Field value by name, for [`crate::filter::Filter`] evaluation.
    fn field(&self, name: &str) -> Option<Value>;
}

/// A shared, slot-preserving reference to a stored item.
///
/// `ItemStore` and every `ReactiveList` hold the same `Arc`, so a
/// slot-preserving upsert is observed by all views without copying.
pub type ItemRef<I> = Arc<RwLock<I>>;

/// Build a fresh item slot.
pub fn item_ref<I: Resource>(item: I) -> ItemRef<I> {
    Arc::new(RwLock::new(item))
}

/// Identity of a live subscription channel, assigned by the transport.
///
/// Push events carry the originating channel's id so that independently
/// filtered lists of the same item class can ignore each other's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}
