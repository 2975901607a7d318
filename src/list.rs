//! ReactiveList — a live, sorted, deduplicated view of remote items scoped
//! by a server filter and an optional local filter.
//!
//! # Concurrency model
//!
//! Execution is cooperative: list contents only mutate on query resolution
//! or event-callback delivery, which may interleave arbitrarily but never
//! run in parallel on the same list state (all state sits behind locks).
//! Two rules keep this correct under interleaving:
//!
//! - **Fencing**: every `reload_items` bumps a generation counter and
//!   records the filter it loads for; a query result is merged only if its
//!   generation is still current and its filter still deep-equals the list's
//!   current filter. There is no other cancellation — in-flight queries
//!   cannot be aborted.
//! - **Subscribe before query**: the channel is (re)subscribed before the
//!   query is issued, so events arriving during the query window are not
//!   lost; the merge skips items a racing create event already added.
//!
//! Locks are never held across an await or while a presentation callback
//! ([`ListCallbacks`]) runs. The one exception is the comparator: it sorts
//! under the list lock so membership changes stay atomic, and therefore
//! must not call back into the list.

use std::cmp::Ordering as CmpOrdering;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as TokioMutex;

use crate::bus::{should_ignore_callback, CallbackHandle, EventKind, ItemEvent};
use crate::cache::QueryCache;
use crate::channel::{ChannelState, ResourceClient, SubscriptionChannel};
use crate::class::ResourceClass;
use crate::error::{LiveListError, Result, TransportError};
use crate::filter::Filter;
use crate::types::{ChannelId, ItemRef, Resource};

// ============================================================================
// Options and callbacks
// ============================================================================

/// Strict-weak-ordering comparator supplied by the caller. It runs while
/// the list's internal lock is held, so it must not call back into the
/// list. A panicking comparator is a programmer error and propagates.
pub type Comparator<I> = Arc<dyn Fn(&I, &I) -> CmpOrdering + Send + Sync>;

/// Optional async hook run before the first load (e.g. config the
/// comparator needs).
pub type AuxLoader = Arc<
    dyn Fn() -> Pin<Box<dyn Future<Output = std::result::Result<(), TransportError>> + Send>>
        + Send
        + Sync,
>;

/// Presentation-layer hooks. All optional; all invoked outside any lock.
pub struct ListCallbacks<I: Resource> {
    /// Load (initial or reload) finished successfully.
    pub on_load: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Load failed. The list is left empty; no retry is attempted.
    pub on_load_error: Option<Arc<dyn Fn(&LiveListError) + Send + Sync>>,
    /// An update changed an item's data without changing membership. The
    /// value has already been merged in place.
    pub on_item_data_update: Option<Arc<dyn Fn(&ItemRef<I>, &I) + Send + Sync>>,
    /// Sequential dependency loaded before the first `reload_items`.
    pub load_aux_data: Option<AuxLoader>,
}

impl<I: Resource> Default for ListCallbacks<I> {
    fn default() -> Self {
        Self {
            on_load: None,
            on_load_error: None,
            on_item_data_update: None,
            load_aux_data: None,
        }
    }
}

pub struct ReactiveListOptions<I: Resource> {
    pub client: Arc<dyn ResourceClient<I>>,
    pub class: Arc<ResourceClass<I>>,
    /// Server-scoping filter the subscription and queries use.
    pub filter: Filter,
    /// Secondary client-only filter; `"except"` here denotes "every item
    /// except this primary key" (sibling views of an entity under edit).
    pub local_filter: Option<Filter>,
    pub compare: Comparator<I>,
    pub callbacks: ListCallbacks<I>,
    /// When present, the list binds its channel to the cache and flushes
    /// affected entries on filter changes.
    pub cache: Option<Arc<QueryCache<I>>>,
}

// ============================================================================
// ReactiveList
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState {
    Idle,
    Loading,
    Ready,
    /// Terminal.
    Destroyed,
}

struct ListInner<I: Resource> {
    state: ListState,
    loading: bool,
    items: Vec<ItemRef<I>>,
    filter: Filter,
    local_filter: Option<Filter>,
    /// The filter the last `reload_items` loaded for; deep-equal filter
    /// changes are suppressed against it (no reload storms from reference
    /// churn).
    last_loaded_filter: Option<Filter>,
}

pub struct ReactiveList<I: Resource> {
    client: Arc<dyn ResourceClient<I>>,
    class: Arc<ResourceClass<I>>,
    callbacks: ListCallbacks<I>,
    compare: Comparator<I>,
    cache: Option<Arc<QueryCache<I>>>,
    /// Held across awaits during subscribe/change-params, hence tokio.
    channel: TokioMutex<SubscriptionChannel<I>>,
    /// Identity of the live channel, read by event handlers for the
    /// cross-talk check.
    current_channel: Mutex<Option<ChannelId>>,
    /// Fencing token for in-flight loads.
    generation: AtomicU64,
    handles: Mutex<Vec<CallbackHandle>>,
    inner: Mutex<ListInner<I>>,
}

impl<I: Resource> ReactiveList<I> {
    pub fn new(options: ReactiveListOptions<I>) -> Arc<Self> {
        let channel = SubscriptionChannel::new(Arc::clone(&options.client));
        Arc::new(Self {
            client: options.client,
            class: options.class,
            callbacks: options.callbacks,
            compare: options.compare,
            cache: options.cache,
            channel: TokioMutex::new(channel),
            current_channel: Mutex::new(None),
            generation: AtomicU64::new(0),
            handles: Mutex::new(Vec::new()),
            inner: Mutex::new(ListInner {
                state: ListState::Idle,
                loading: false,
                items: Vec::new(),
                filter: options.filter,
                local_filter: options.local_filter,
                last_loaded_filter: None,
            }),
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Snapshot of the current item references, in sort order.
    pub fn items(&self) -> Vec<ItemRef<I>> {
        self.inner.lock().items.clone()
    }

    /// Primary keys of the current items, in sort order.
    pub fn primary_keys(&self) -> Vec<String> {
        self.inner
            .lock()
            .items
            .iter()
            .map(|r| r.read().primary_key())
            .collect()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.lock().loading
    }

    pub fn state(&self) -> ListState {
        self.inner.lock().state
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn filter(&self) -> Filter {
        self.inner.lock().filter.clone()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Wire channel callbacks, load auxiliary data, then perform the first
    /// load. Only valid from the `Idle` state.
    pub async fn activate(self: &Arc<Self>) -> Result<()> {
        {
            let inner = self.inner.lock();
            if inner.state != ListState::Idle {
                return Err(LiveListError::Internal(format!(
                    "activate from state {:?}",
                    inner.state
                )));
            }
        }
        self.wire_callbacks();

        if let Some(aux) = self.callbacks.load_aux_data.clone() {
            if let Err(e) = aux().await {
                let err = LiveListError::Load(e);
                self.emit_load_error(&err);
                return Err(err);
            }
        }

        self.reload_items().await
    }

    /// Unsubscribe, detach callbacks, clear contents. Terminal.
    pub async fn destroy_list(self: &Arc<Self>) {
        {
            let mut channel = self.channel.lock().await;
            if let Err(e) = channel.unsubscribe().await {
                tracing::warn!(error = %e, "channel teardown failed during destroy");
            }
        }
        let handles: Vec<CallbackHandle> = self.handles.lock().drain(..).collect();
        for handle in handles {
            self.class.bus().remove_channel_callback(handle);
        }
        let channel_id = self.current_channel.lock().take();
        if let (Some(cache), Some(id)) = (&self.cache, channel_id) {
            cache.flush_channel(id);
        }
        let mut inner = self.inner.lock();
        inner.items.clear();
        inner.loading = false;
        inner.state = ListState::Destroyed;
    }

    /// Empty the view without touching the subscription or the store.
    pub fn clear_out(&self) {
        self.inner.lock().items.clear();
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Clear contents, (re)subscribe, query, merge.
    ///
    /// The subscription is updated before the query is issued so that the
    /// event window is covered; results are merged only if this load is
    /// still current (see module docs).
    pub async fn reload_items(self: &Arc<Self>) -> Result<()> {
        let filter = {
            let mut inner = self.inner.lock();
            if inner.state == ListState::Destroyed {
                return Err(LiveListError::Internal("reload on destroyed list".into()));
            }
            inner.state = ListState::Loading;
            inner.loading = true;
            inner.last_loaded_filter = Some(inner.filter.clone());
            inner.items.clear();
            inner.filter.clone()
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut channel = self.channel.lock().await;
            let was_active = channel.state() == ChannelState::Active;
            match channel.subscribe(&filter).await {
                Ok(id) => {
                    *self.current_channel.lock() = Some(id);
                    if let Some(cache) = &self.cache {
                        cache.bind_channel(id, &filter);
                    }
                }
                Err(e) => {
                    // A failed in-place parameter change is not independently
                    // recoverable; the next reload re-opens from scratch.
                    let err = if was_active {
                        LiveListError::ChangeParams(e)
                    } else {
                        LiveListError::Subscription(e)
                    };
                    self.finish_load_error(generation, &err);
                    return Err(err);
                }
            }
        }

        match self.client.query(&filter).await {
            Ok(payloads) => {
                let merged = self.merge_query_result(generation, &filter, payloads);
                if merged {
                    if let Some(cb) = &self.callbacks.on_load {
                        cb();
                    }
                }
                Ok(())
            }
            Err(e) => {
                let err = LiveListError::Load(e);
                self.finish_load_error(generation, &err);
                Err(err)
            }
        }
    }

    /// Returns false when the result was discarded as stale.
    fn merge_query_result(&self, generation: u64, filter: &Filter, payloads: Vec<I>) -> bool {
        let mut inner = self.inner.lock();
        if self.generation.load(Ordering::SeqCst) != generation || inner.filter != *filter {
            tracing::debug!("discarding stale query result");
            return false;
        }
        for payload in payloads {
            let item = self.class.store().upsert(payload).into_item();
            let pk = item.read().primary_key();
            if !Self::is_member(&inner, &*item.read()) {
                continue;
            }
            // A create event that raced the query may have added it already.
            if inner.items.iter().any(|r| r.read().primary_key() == pk) {
                continue;
            }
            inner.items.push(item);
        }
        Self::resort_inner(&mut inner, &self.compare);
        inner.loading = false;
        inner.state = ListState::Ready;
        true
    }

    fn finish_load_error(&self, generation: u64, err: &LiveListError) {
        // A newer load owns the list now; don't disturb its flags.
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        {
            let mut inner = self.inner.lock();
            inner.loading = false;
            inner.state = ListState::Idle;
            inner.items.clear();
        }
        self.emit_load_error(err);
    }

    fn emit_load_error(&self, err: &LiveListError) {
        if let Some(cb) = &self.callbacks.on_load_error {
            cb(err);
        }
    }

    /// Reload under a new server filter. Deep-equal filters are a no-op so
    /// reference churn in the caller never causes reload storms.
    pub async fn on_filter_change(self: &Arc<Self>, new_filter: Filter) -> Result<()> {
        let old = {
            let inner = self.inner.lock();
            if inner.last_loaded_filter.as_ref() == Some(&new_filter) {
                return Ok(());
            }
            inner.filter.clone()
        };
        if let Some(cache) = &self.cache {
            cache.invalidate_for_param_change(&old, &new_filter);
        }
        self.inner.lock().filter = new_filter;
        self.reload_items().await
    }

    /// Re-apply the caller-supplied comparator.
    pub fn resort(&self) {
        let mut inner = self.inner.lock();
        Self::resort_inner(&mut inner, &self.compare);
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    fn wire_callbacks(self: &Arc<Self>) {
        let bus = self.class.bus();

        let weak = Arc::downgrade(self);
        let h_create = bus.add_channel_callback(EventKind::Create, move |ev| {
            if let Some(list) = weak.upgrade() {
                list.on_create(ev);
            }
        });
        let weak = Arc::downgrade(self);
        let h_update = bus.add_channel_callback(EventKind::Update, move |ev| {
            if let Some(list) = weak.upgrade() {
                list.on_update(ev);
            }
        });
        let weak = Arc::downgrade(self);
        let h_delete = bus.add_channel_callback(EventKind::Delete, move |ev| {
            if let Some(list) = weak.upgrade() {
                list.on_delete(ev);
            }
        });

        self.handles.lock().extend([h_create, h_update, h_delete]);
    }

    fn is_foreign(&self, ev: &ItemEvent<I>) -> bool {
        should_ignore_callback(*self.current_channel.lock(), ev.channel)
    }

    fn on_create(&self, ev: &ItemEvent<I>) {
        if self.is_foreign(ev) {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.state == ListState::Destroyed {
            return;
        }
        // Membership is re-checked locally; the server-side filter is not
        // solely trusted.
        if !Self::is_member(&inner, &*ev.item.read()) {
            return;
        }
        let pk = ev.item.read().primary_key();
        if inner.items.iter().any(|r| r.read().primary_key() == pk) {
            drop(inner);
            tracing::warn!(key = %pk, "duplicate add ignored");
            return;
        }
        inner.items.push(ev.item.clone());
        Self::resort_inner(&mut inner, &self.compare);
    }

    fn on_update(&self, ev: &ItemEvent<I>) {
        if self.is_foreign(ev) {
            return;
        }
        let forward = {
            let mut inner = self.inner.lock();
            if inner.state == ListState::Destroyed {
                return;
            }
            let member = Self::is_member(&inner, &*ev.item.read());
            let pk = ev.item.read().primary_key();
            let present = inner.items.iter().any(|r| r.read().primary_key() == pk);
            match (member, present) {
                (true, false) => {
                    inner.items.push(ev.item.clone());
                    Self::resort_inner(&mut inner, &self.compare);
                    false
                }
                (false, true) => {
                    inner.items.retain(|r| r.read().primary_key() != pk);
                    Self::resort_inner(&mut inner, &self.compare);
                    false
                }
                // Membership unchanged; the value is already merged in
                // place — forward to the data-update hook.
                (true, true) => true,
                (false, false) => false,
            }
        };
        if forward {
            if let Some(cb) = &self.callbacks.on_item_data_update {
                if let Some(previous) = &ev.previous {
                    cb(&ev.item, previous);
                }
            }
        }
    }

    fn on_delete(&self, ev: &ItemEvent<I>) {
        if self.is_foreign(ev) {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.state == ListState::Destroyed {
            return;
        }
        // Unconditional, irrespective of the current local filter.
        let pk = ev.item.read().primary_key();
        inner.items.retain(|r| r.read().primary_key() != pk);
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Membership = server filter AND local filter, both evaluated locally.
    fn is_member(inner: &ListInner<I>, item: &I) -> bool {
        if !inner.filter.matches(item) {
            return false;
        }
        match &inner.local_filter {
            Some(local) => local.matches(item),
            None => true,
        }
    }

    fn resort_inner(inner: &mut ListInner<I>, compare: &Comparator<I>) {
        inner.items.sort_by(|a, b| compare(&a.read(), &b.read()));
    }
}
