//! Message type for the relay.
//!
//! A message is stamped once, at publish time, and never mutated afterwards.

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// HTTP status carried by the synthetic conflict broadcast.
pub(crate) const STATUS_CONFLICT: u16 = 409;

/// HTTP status carried by the synthetic gone broadcast.
pub(crate) const STATUS_GONE: u16 = 410;

/// Current wall-clock time in whole seconds since the Unix epoch.
#[must_use]
pub(crate) fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// A single application data packet relayed from a publisher to
/// subscribers, carrying the HTTP status, content-type and body to use
/// when delivering it.
#[derive(Debug, Clone)]
pub struct Message {
    /// HTTP status code to respond with.
    pub status: u16,
    /// Content-type of the payload, if any.
    pub content_type: Option<String>,
    /// The body to deliver.
    pub payload: Bytes,
    /// Creation time in seconds since the epoch. Zero until published.
    pub(crate) time: i64,
    /// Intra-second disambiguator. Zero until published.
    pub(crate) etag: i64,
}

impl Message {
    /// Create a new, unstamped message.
    ///
    /// The `(time, etag)` stamp is assigned by [`Channel::publish`] and is
    /// zero until then.
    ///
    /// [`Channel::publish`]: crate::channel::Channel::publish
    #[must_use]
    pub fn new(status: u16, content_type: Option<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type,
            payload: payload.into(),
            time: 0,
            etag: 0,
        }
    }

    /// Create a plain-text message with a 200 status.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(200, Some("text/plain".to_string()), body.into().into_bytes())
    }

    /// Synthetic 409 broadcast to subscribers evicted by a concurrency
    /// policy. Stamps stay at zero.
    #[must_use]
    pub(crate) fn conflict() -> Self {
        Self::new(STATUS_CONFLICT, None, Bytes::new())
    }

    /// Synthetic 410 broadcast to subscribers of a deleted or collected
    /// channel. Stamps stay at zero.
    #[must_use]
    pub(crate) fn gone() -> Self {
        Self::new(STATUS_GONE, None, Bytes::new())
    }

    /// Creation time in seconds since the epoch.
    #[must_use]
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Intra-second disambiguator. Clients treat this opaquely; within the
    /// channel it totals the order of same-second publishes.
    #[must_use]
    pub fn etag(&self) -> i64 {
        self.etag
    }

    /// The `(time, etag)` ordering key.
    #[must_use]
    pub fn stamp(&self) -> (i64, i64) {
        (self.time, self.etag)
    }
}
