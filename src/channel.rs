//! SubscriptionChannel — transport-facing handle bound to one filter.
//!
//! The wire protocol lives behind [`ResourceClient`] / [`ChannelTransport`];
//! this module only manages lifecycle: a list never holds more than one live
//! channel, a repeat subscribe becomes an in-place parameter change, and
//! teardown first neutralizes the filter so no events arrive mid-teardown.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::filter::Filter;
use crate::types::{ChannelId, Resource};

// ============================================================================
// Collaborator traits
// ============================================================================

/// Resource-API client provided by the surrounding application.
///
/// Implementations handle the wire protocol; they are expected to decode
/// push messages and feed them into [`crate::class::ResourceClass::ingest_create`]
/// and friends, tagging each with the originating [`ChannelId`].
#[async_trait]
pub trait ResourceClient<I: Resource>: Send + Sync {
    /// One-shot query for items matching `filter`, in server order.
    async fn query(&self, filter: &Filter) -> Result<Vec<I>, TransportError>;

    /// Open a push-event channel scoped by `filter`.
    async fn open_channel(
        &self,
        filter: &Filter,
    ) -> Result<Box<dyn ChannelTransport>, TransportError>;
}

/// A live push channel on the transport.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Transport-assigned identity, carried on every event this channel
    /// delivers.
    fn id(&self) -> ChannelId;

    /// Change the server-side filter without resubscribing.
    async fn change_params(&self, filter: &Filter) -> Result<(), TransportError>;

    /// Tear the channel down.
    async fn unsubscribe(&self) -> Result<(), TransportError>;
}

// ============================================================================
// SubscriptionChannel
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unsubscribed,
    Subscribing,
    Active,
}

/// Owns the current filter and at most one live [`ChannelTransport`].
pub struct SubscriptionChannel<I: Resource> {
    client: std::sync::Arc<dyn ResourceClient<I>>,
    state: ChannelState,
    transport: Option<Box<dyn ChannelTransport>>,
    filter: Filter,
}

impl<I: Resource> SubscriptionChannel<I> {
    pub fn new(client: std::sync::Arc<dyn ResourceClient<I>>) -> Self {
        Self {
            client,
            state: ChannelState::Unsubscribed,
            transport: None,
            filter: Filter::new(),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// The live channel's identity, if subscribed.
    pub fn id(&self) -> Option<ChannelId> {
        self.transport.as_ref().map(|t| t.id())
    }

    /// Open a channel on first call; on subsequent calls change parameters
    /// in place. Never more than one live channel.
    pub async fn subscribe(&mut self, filter: &Filter) -> Result<ChannelId, TransportError> {
        if self.transport.is_some() {
            self.change_params(filter).await?;
            // change_params only fails after dropping the transport, so it
            // is still present here.
            let id = self
                .transport
                .as_ref()
                .map(|t| t.id())
                .ok_or_else(|| TransportError::new("channel lost during parameter change"))?;
            return Ok(id);
        }

        self.state = ChannelState::Subscribing;
        match self.client.open_channel(filter).await {
            Ok(transport) => {
                let id = transport.id();
                self.transport = Some(transport);
                self.filter = filter.clone();
                self.state = ChannelState::Active;
                Ok(id)
            }
            Err(e) => {
                self.state = ChannelState::Unsubscribed;
                Err(e)
            }
        }
    }

    /// Send a parameter-change command without resubscribing.
    ///
    /// A failure here is not independently recoverable: the transport is
    /// dropped and the caller must issue a full reload.
    pub async fn change_params(&mut self, filter: &Filter) -> Result<(), TransportError> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| TransportError::new("change_params on unsubscribed channel"))?;

        match transport.change_params(filter).await {
            Ok(()) => {
                self.filter = filter.clone();
                Ok(())
            }
            Err(e) => {
                tracing::debug!(error = %e, "parameter change failed, dropping channel");
                self.transport = None;
                self.state = ChannelState::Unsubscribed;
                Err(e)
            }
        }
    }

    /// Neutralize the filter, then tear the channel down. Teardown errors
    /// are returned but the channel is gone either way.
    pub async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        let transport = match self.transport.take() {
            Some(t) => t,
            None => return Ok(()),
        };
        self.state = ChannelState::Unsubscribed;
        self.filter = Filter::match_nothing();

        // Match-nothing first so no event lands mid-teardown. If the command
        // fails the transport is torn down regardless.
        let neutralize = transport.change_params(&Filter::match_nothing()).await;
        let teardown = transport.unsubscribe().await;
        neutralize.and(teardown)
    }
}
