//! Relay behavior knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a channel treats concurrent subscribers.
///
/// When a conflict occurs in the `Lifo` and `Filo` modes, the losing side
/// is answered with a 409.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyMode {
    /// Every parked subscriber receives each published message.
    #[default]
    Broadcast,
    /// Last in wins: a new subscriber kicks all parked ones out with a 409.
    Lifo,
    /// First in wins: while anyone is parked, new subscribers get an
    /// immediate 409 and the parked ones are unaffected.
    Filo,
}

/// How the subscriber response cycle behaves when no message is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollingMechanism {
    /// Park the request until a publish arrives or the poll timeout fires.
    #[default]
    Long,
    /// Answer immediately; the client polls on its own interval.
    Interval,
}

/// Configuration shared by every channel of a [`Relay`].
///
/// [`Relay`]: crate::relay::Relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Whether the subscriber side may create channels.
    pub allow_channel_creation: bool,
    /// Maximum queued messages per channel. Zero disables queueing.
    pub channel_capacity: usize,
    /// Behavior of channels under concurrent subscribers.
    pub concurrency_mode: ConcurrencyMode,
    /// When set, overrides the content-type of published messages.
    pub content_type: Option<String>,
    /// Interval between garbage collection runs. Zero disables GC.
    pub gc_interval: Duration,
    /// Soft cap on the number of channels. Zero disables the cap.
    pub max_channels: usize,
    /// Channels idle longer than this are collected. Zero disables.
    pub max_channel_idle: Duration,
    /// Behavior of subscriber response cycles.
    pub polling_mechanism: PollingMechanism,
    /// Maximum time a long-poll request stays parked. Zero waits forever.
    pub poll_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            allow_channel_creation: false,
            channel_capacity: 20,
            concurrency_mode: ConcurrencyMode::default(),
            content_type: None,
            gc_interval: Duration::from_secs(60),
            max_channels: 0,
            max_channel_idle: Duration::from_secs(600),
            polling_mechanism: PollingMechanism::default(),
            poll_timeout: Duration::from_secs(20),
        }
    }
}
