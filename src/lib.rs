//! livelist — reactive collection synchronization.
//!
//! Keeps client-held "live lists" of remote domain items consistent with a
//! backend by combining an initial query with a push-event subscription, and
//! maintains a parameter-keyed query cache that is partially invalidated when
//! a subscription's filter parameters change.
//!
//! # Components
//!
//! - [`store::ItemStore`] — identity-preserving keyed storage for items.
//! - [`filter::Filter`] — predicate evaluating item membership.
//! - [`channel::SubscriptionChannel`] — transport-facing handle bound to one
//!   filter, with in-place parameter change.
//! - [`list::ReactiveList`] — live, sorted, deduplicated view scoped by a
//!   server filter and an optional local filter.
//! - [`cache::QueryCache`] — query results keyed by normalized parameters,
//!   kept live by the same push events.
//! - [`planner`] — computes which cache entries a parameter change must drop.
//!
//! The wire protocol, rendering, and authentication are collaborators behind
//! the [`channel::ResourceClient`] / [`channel::ChannelTransport`] traits.

pub mod bus;
pub mod cache;
pub mod channel;
pub mod class;
pub mod error;
pub mod filter;
pub mod list;
pub mod planner;
pub mod store;
pub mod types;

pub use bus::{should_ignore_callback, CallbackHandle, EventBus, EventKind, ItemEvent};
pub use cache::{EntryToken, QueryCache};
pub use channel::{ChannelState, ChannelTransport, ResourceClient, SubscriptionChannel};
pub use class::ResourceClass;
pub use error::{LiveListError, Result, TransportError, TransportErrorKind};
pub use filter::{Filter, FilterValue};
pub use list::{ListCallbacks, ListState, ReactiveList, ReactiveListOptions};
pub use store::{ItemStore, UpdateOutcome, Upsert};
pub use types::{ChannelId, ItemRef, Resource};
