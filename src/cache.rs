//! QueryCache — query results keyed by normalized parameters, kept live by
//! the same push events that feed the reactive lists.
//!
//! An entry's `items` vector is only appended to, never rebuilt in place;
//! the entry as a whole is dropped by an explicit flush or by the
//! invalidation planner. Readers that arrive before the backing query
//! resolves wait on the entry's status; a flush while the query is still in
//! flight surfaces [`LiveListError::CacheInvalidated`] to every waiter —
//! never an empty success, since an empty result means "no matches".

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::bus::{CallbackHandle, EventBus, EventKind};
use crate::channel::ResourceClient;
use crate::error::{LiveListError, Result};
use crate::filter::Filter;
use crate::planner;
use crate::store::ItemStore;
use crate::types::{ChannelId, ItemRef, Resource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryStatus {
    Pending,
    Ready,
    Invalidated,
}

struct CacheEntry<I: Resource> {
    params: Filter,
    items: Vec<ItemRef<I>>,
    status: watch::Sender<EntryStatus>,
    /// Incarnation marker. A flushed-and-recreated key holds a different
    /// epoch, so operations carrying the old entry's token are refused.
    epoch: u64,
}

/// Identifies one incarnation of a cache entry.
///
/// Normalized keys alone are ambiguous under flush-while-pending: a second
/// query can recreate the same key while the first is still in flight, and
/// the first query's late resolution must not land in the new entry.
/// [`QueryCache::fulfill`] and [`QueryCache::fail`] only act when the token
/// still names the live incarnation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryToken {
    key: String,
    epoch: u64,
}

impl EntryToken {
    pub fn key(&self) -> &str {
        &self.key
    }
}

struct CacheInner<I: Resource> {
    entries: HashMap<String, CacheEntry<I>>,
    /// Live channel → the cache key its filter normalizes to.
    channel_keys: HashMap<ChannelId, String>,
    next_epoch: u64,
}

/// Parameter-keyed cache of query result sets.
pub struct QueryCache<I: Resource> {
    /// Sorted whitelist of parameter keys that participate in cache
    /// identity. Extraneous fields and parameter order never affect it.
    whitelist: Vec<String>,
    inner: Mutex<CacheInner<I>>,
}

impl<I: Resource> QueryCache<I> {
    pub fn new(whitelist: impl IntoIterator<Item = impl Into<String>>) -> Arc<Self> {
        let mut whitelist: Vec<String> = whitelist.into_iter().map(Into::into).collect();
        whitelist.sort();
        whitelist.dedup();
        Arc::new(Self {
            whitelist,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                channel_keys: HashMap::new(),
                next_epoch: 1,
            }),
        })
    }

    /// Canonical cache key: `"key:JSON(value)"` joined over the whitelist,
    /// sorted lexicographically.
    pub fn normalized_key(&self, params: &Filter) -> String {
        let mut parts = Vec::new();
        for key in &self.whitelist {
            if let Some(value) = params.get(key) {
                let json = serde_json::to_string(value).unwrap_or_default();
                parts.push(format!("{key}:{json}"));
            }
        }
        parts.join(";")
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    /// Look up the entry for `params`. A miss is `None`, not an error.
    ///
    /// The returned future resolves to a fresh copy of the entry's items
    /// once the backing query has resolved, or to `CacheInvalidated` if the
    /// entry is flushed first.
    pub fn cached_result_for(
        self: &Arc<Self>,
        params: &Filter,
    ) -> Option<impl std::future::Future<Output = Result<Vec<ItemRef<I>>>>> {
        let key = self.normalized_key(params);
        let (epoch, rx) = {
            let inner = self.inner.lock();
            inner
                .entries
                .get(&key)
                .map(|e| (e.epoch, e.status.subscribe()))
        }?;
        let cache = Arc::clone(self);
        Some(async move { cache.await_entry(key, epoch, rx).await })
    }

    async fn await_entry(
        &self,
        key: String,
        epoch: u64,
        mut rx: watch::Receiver<EntryStatus>,
    ) -> Result<Vec<ItemRef<I>>> {
        let status = match rx.wait_for(|s| *s != EntryStatus::Pending).await {
            Ok(status) => *status,
            // Sender dropped while still pending: the entry is gone.
            Err(_) => EntryStatus::Invalidated,
        };
        if status == EntryStatus::Invalidated {
            return Err(LiveListError::CacheInvalidated { key });
        }
        let inner = self.inner.lock();
        // The incarnation we subscribed to must still be the live one.
        match inner.entries.get(&key) {
            Some(entry) if entry.epoch == epoch => Ok(entry.items.clone()),
            _ => Err(LiveListError::CacheInvalidated { key }),
        }
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Create a pending entry for `params` and return a token naming this
    /// incarnation. Concurrent reads observe the pending status, not stale
    /// items; a replaced entry's waiters see `CacheInvalidated`.
    pub fn push_to_query_cache(&self, params: &Filter) -> EntryToken {
        let key = self.normalized_key(params);
        let (status, _) = watch::channel(EntryStatus::Pending);
        let mut inner = self.inner.lock();
        let epoch = inner.next_epoch;
        inner.next_epoch += 1;
        let replaced = inner.entries.insert(
            key.clone(),
            CacheEntry {
                params: params.clone(),
                items: Vec::new(),
                status,
                epoch,
            },
        );
        if let Some(old) = replaced {
            let _ = old.status.send(EntryStatus::Invalidated);
        }
        EntryToken { key, epoch }
    }

    /// Append the resolved query results into the entry and wake waiters.
    ///
    /// Results already appended by a racing create event are not duplicated.
    /// Returns the entry's full item set, or `CacheInvalidated` when the
    /// entry was flushed while the query was in flight — even if a newer
    /// query has since recreated the same key.
    pub fn fulfill(&self, token: &EntryToken, items: Vec<ItemRef<I>>) -> Result<Vec<ItemRef<I>>> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .get_mut(&token.key)
            .filter(|e| e.epoch == token.epoch)
            .ok_or_else(|| LiveListError::CacheInvalidated {
                key: token.key.clone(),
            })?;
        for item in items {
            let pk = item.read().primary_key();
            if !entry.items.iter().any(|r| r.read().primary_key() == pk) {
                entry.items.push(item);
            }
        }
        let snapshot = entry.items.clone();
        let _ = entry.status.send(EntryStatus::Ready);
        Ok(snapshot)
    }

    /// Drop the entry because its query failed. Waiters see
    /// `CacheInvalidated`. A recreated incarnation under the same key is
    /// left untouched.
    pub fn fail(&self, token: &EntryToken) {
        let removed = {
            let mut inner = self.inner.lock();
            let live = inner
                .entries
                .get(&token.key)
                .map_or(false, |e| e.epoch == token.epoch);
            if live {
                inner.entries.remove(&token.key)
            } else {
                None
            }
        };
        if let Some(entry) = removed {
            let _ = entry.status.send(EntryStatus::Invalidated);
        }
    }

    /// Miss → query → fulfill in one step, upserting results through the
    /// shared store so cached references share slots with live lists.
    pub async fn query_via(
        self: &Arc<Self>,
        client: &Arc<dyn ResourceClient<I>>,
        store: &Arc<ItemStore<I>>,
        params: &Filter,
    ) -> Result<Vec<ItemRef<I>>> {
        if let Some(pending) = self.cached_result_for(params) {
            return pending.await;
        }
        let token = self.push_to_query_cache(params);
        match client.query(params).await {
            Ok(payloads) => {
                let refs: Vec<ItemRef<I>> = payloads
                    .into_iter()
                    .map(|p| store.upsert(p).into_item())
                    .collect();
                self.fulfill(&token, refs)
            }
            Err(e) => {
                self.fail(&token);
                Err(LiveListError::Load(e))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Push-event maintenance
    // -----------------------------------------------------------------------

    /// Associate a live channel with the key its filter normalizes to, so
    /// that events carrying this channel id maintain the right entry.
    pub fn bind_channel(&self, channel: ChannelId, params: &Filter) -> String {
        let key = self.normalized_key(params);
        self.inner.lock().channel_keys.insert(channel, key.clone());
        key
    }

    /// Append a created item to the entry owned by the channel's key.
    pub fn on_channel_create(&self, item: &ItemRef<I>, channel: ChannelId) {
        let mut inner = self.inner.lock();
        let Some(key) = inner.channel_keys.get(&channel).cloned() else {
            return;
        };
        let Some(entry) = inner.entries.get_mut(&key) else {
            return;
        };
        let pk = item.read().primary_key();
        if !entry.items.iter().any(|r| r.read().primary_key() == pk) {
            entry.items.push(item.clone());
        }
    }

    /// Remove a deleted item from the entry owned by the channel's key.
    pub fn on_channel_delete(&self, primary_key: &str, channel: ChannelId) {
        let mut inner = self.inner.lock();
        let Some(key) = inner.channel_keys.get(&channel).cloned() else {
            return;
        };
        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.items.retain(|r| r.read().primary_key() != primary_key);
        }
    }

    /// Wire this cache onto a class bus so the same push events that feed
    /// the lists keep cache entries live. Returns the handles for detach.
    pub fn attach(self: &Arc<Self>, bus: &EventBus<I>) -> Vec<CallbackHandle> {
        let weak_create = Arc::downgrade(self);
        let h_create = bus.add_channel_callback(EventKind::Create, move |ev| {
            if let (Some(cache), Some(channel)) = (weak_create.upgrade(), ev.channel) {
                cache.on_channel_create(&ev.item, channel);
            }
        });
        let weak_delete = Arc::downgrade(self);
        let h_delete = bus.add_channel_callback(EventKind::Delete, move |ev| {
            if let (Some(cache), Some(channel)) = (weak_delete.upgrade(), ev.channel) {
                let pk = ev.item.read().primary_key();
                cache.on_channel_delete(&pk, channel);
            }
        });
        vec![h_create, h_delete]
    }

    // -----------------------------------------------------------------------
    // Invalidation
    // -----------------------------------------------------------------------

    /// Drop the entry for a channel's key and forget the channel binding.
    pub fn flush_channel(&self, channel: ChannelId) {
        let key = self.inner.lock().channel_keys.remove(&channel);
        if let Some(key) = key {
            self.flush_key(&key);
        }
    }

    /// Drop one entry. Pending waiters see `CacheInvalidated`.
    pub fn flush_key(&self, key: &str) {
        let removed = self.inner.lock().entries.remove(key);
        if let Some(entry) = removed {
            let _ = entry.status.send(EntryStatus::Invalidated);
        }
    }

    /// Drop everything. Called by the connection-lifecycle collaborator on
    /// disconnect.
    pub fn flush_all(&self) {
        let entries: Vec<CacheEntry<I>> = {
            let mut inner = self.inner.lock();
            inner.channel_keys.clear();
            inner.entries.drain().map(|(_, e)| e).collect()
        };
        for entry in entries {
            let _ = entry.status.send(EntryStatus::Invalidated);
        }
    }

    /// Apply the invalidation planner to a channel parameter change,
    /// dropping every entry whose own parameters, expanded identically,
    /// intersect the removed combinations. Returns the dropped keys.
    pub fn invalidate_for_param_change(&self, old: &Filter, new: &Filter) -> Vec<String> {
        let plan = planner::plan(old, new);
        let affected: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .filter(|(_, entry)| planner::affects(&plan, &entry.params))
                .map(|(key, _)| key.clone())
                .collect()
        };
        for key in &affected {
            tracing::debug!(%key, "dropping cache entry after parameter change");
            self.flush_key(key);
        }
        affected
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}
