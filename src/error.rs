use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// How a transport failure should be interpreted by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Retrying the same operation may succeed (the caller decides; this
    /// crate never retries on its own).
    Transient,
    /// Retrying is pointless without operator intervention.
    Fatal,
}

/// Connection-level error surfaced by a [`crate::channel::ResourceClient`]
/// or [`crate::channel::ChannelTransport`] implementation.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
    pub kind: TransportErrorKind,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: TransportErrorKind::Transient,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: TransportErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TransportError {}

// ---------------------------------------------------------------------------
// LiveListError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LiveListError {
    /// The initial or reload query failed. The list is left empty with its
    /// loading flag cleared; retry is the caller's decision.
    #[error("Load failed: {0}")]
    Load(TransportError),

    /// The subscription could not be opened during a load.
    #[error("Subscription failed: {0}")]
    Subscription(TransportError),

    /// An in-place parameter change failed. The channel is no longer usable;
    /// the caller must issue a full reload.
    #[error("Channel parameter change failed (full reload required): {0}")]
    ChangeParams(TransportError),

    /// A cache entry vanished before its query resolved. This must never be
    /// reported as an empty result — an empty result means "no matches".
    #[error("Cache entry \"{key}\" was invalidated before its query resolved")]
    CacheInvalidated { key: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias — the default error type is `LiveListError`.
pub type Result<T, E = LiveListError> = std::result::Result<T, E>;
