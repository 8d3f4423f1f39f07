//! Channel engine.
//!
//! A channel is a named gateway for messages to pass from publishers to
//! subscribers. It keeps a bounded history of published messages (newest
//! first), a wait-set of parked long-poll subscribers, and statistics, all
//! behind a single channel-scoped lock.

use crate::config::{ConcurrencyMode, PollingMechanism, RelayConfig};
use crate::message::{unix_seconds, Message};
use crate::stats::Stats;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// A parked subscriber's end of the rendezvous.
///
/// At most one message is ever handed through a slot; after that, or after
/// the publisher side is dropped, the slot is closed. A slot that closes
/// without a message means "nothing arrived, poll again".
#[derive(Debug)]
pub struct WaitSlot {
    token: u64,
    rx: oneshot::Receiver<Arc<Message>>,
}

impl WaitSlot {
    /// Identity of this slot inside its channel, for [`Channel::unsubscribe`].
    #[must_use]
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Wait for the handoff.
    ///
    /// Resolves to `None` when the slot was closed without a message (a
    /// publish fanned out before this subscriber was reachable, or the
    /// slot was unsubscribed). Callers enforcing a poll timeout wrap this
    /// in `tokio::time::timeout` and unsubscribe on expiry.
    pub async fn recv(self) -> Option<Arc<Message>> {
        self.rx.await.ok()
    }
}

/// Outcome of [`Channel::subscribe`].
#[derive(Debug)]
pub enum Subscription {
    /// A message was immediately available: a queued message newer than the
    /// requested stamp, or a synthetic conflict.
    Ready(Arc<Message>),
    /// The request was parked on a fresh wait-slot (long polling).
    Parked(WaitSlot),
    /// Nothing new and nothing to park on (interval polling).
    Empty,
}

struct ChannelState {
    /// Published messages, newest first.
    queue: VecDeque<Arc<Message>>,
    /// Parked subscribers, oldest first.
    slots: Vec<(u64, oneshot::Sender<Arc<Message>>)>,
    /// The most recent publish, queued or not. Drives etag assignment.
    last_message: Option<Arc<Message>>,
    stats: Stats,
    next_token: u64,
}

/// A gateway for messages to pass from publishers to subscribers.
pub struct Channel {
    id: String,
    config: Arc<RelayConfig>,
    state: RwLock<ChannelState>,
}

impl Channel {
    /// Create a new channel.
    #[must_use]
    pub fn new(id: impl Into<String>, config: Arc<RelayConfig>) -> Self {
        Self {
            id: id.into(),
            config,
            state: RwLock::new(ChannelState {
                queue: VecDeque::new(),
                slots: Vec::new(),
                last_message: None,
                stats: Stats {
                    created: unix_seconds(),
                    ..Stats::default()
                },
                next_token: 0,
            }),
        }
    }

    /// The channel's name.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Publish a message to every parked subscriber, optionally queueing it
    /// for future requests.
    ///
    /// The message is stamped here: `time` is the current wall clock in
    /// seconds, `etag` restarts at zero each second and counts up when
    /// several messages land within the same second. Returns how many
    /// parked subscribers the message was handed to.
    pub fn publish(&self, message: Message, queue: bool) -> usize {
        self.publish_at(message, queue, unix_seconds())
    }

    /// Publish a plain-text message with a 200 status.
    pub fn publish_text(&self, body: impl Into<String>, queue: bool) -> usize {
        self.publish(Message::text(body), queue)
    }

    pub(crate) fn publish_at(&self, mut message: Message, queue: bool, now: i64) -> usize {
        let mut state = self.state.write();

        message.time = now;
        message.etag = match &state.last_message {
            Some(last) if last.time == now => last.etag + 1,
            _ => 0,
        };
        let message = Arc::new(message);

        state.last_message = Some(Arc::clone(&message));
        state.stats.published += 1;
        state.stats.last_published = now;

        let delivered = Self::drain_locked(&mut state, &message);

        if queue && self.config.channel_capacity > 0 {
            if state.queue.len() >= self.config.channel_capacity {
                // Capacity eviction is silent: the queued counter only
                // tracks how many slots of the queue are occupied.
                state.queue.pop_back();
            } else {
                state.stats.queued += 1;
            }
            state.queue.push_front(Arc::clone(&message));
        }

        trace!(
            channel = %self.id,
            time = message.time,
            etag = message.etag,
            delivered,
            queued = queue,
            "published message"
        );
        delivered
    }

    /// Hand `message` to every parked subscriber and close their slots,
    /// without stamping or counting it as published. Used for the synthetic
    /// conflict and gone broadcasts.
    pub(crate) fn drain(&self, message: &Arc<Message>) -> usize {
        let mut state = self.state.write();
        let delivered = Self::drain_locked(&mut state, message);
        if delivered > 0 {
            debug!(channel = %self.id, status = message.status, delivered, "drained subscribers");
        }
        delivered
    }

    fn drain_locked(state: &mut ChannelState, message: &Arc<Message>) -> usize {
        let mut delivered = 0;
        for (_, tx) in state.slots.drain(..) {
            // Try-send semantics: a subscriber whose receiver is already
            // gone simply misses this message and refetches from the queue
            // on its next request.
            if tx.send(Arc::clone(message)).is_ok() {
                delivered += 1;
            }
        }
        state.stats.subscribers = 0;
        state.stats.delivered += delivered as u64;
        delivered
    }

    /// Register interest in the first message newer than `(since, etag)`.
    ///
    /// `since` and `etag` come from the request's `If-Modified-Since` and
    /// `If-None-Match` headers; `(0, 0)` means "the oldest available".
    /// Returns [`Subscription::Ready`] when a suitable queued message (or a
    /// concurrency conflict) answers the request immediately,
    /// [`Subscription::Parked`] when the request should long-poll, and
    /// [`Subscription::Empty`] when interval polling has nothing new.
    pub fn subscribe(&self, since: i64, etag: i64) -> Subscription {
        self.subscribe_at(since, etag, unix_seconds())
    }

    pub(crate) fn subscribe_at(&self, since: i64, etag: i64, now: i64) -> Subscription {
        let mut state = self.state.write();
        state.stats.last_requested = now;

        match self.config.concurrency_mode {
            ConcurrencyMode::Lifo => {
                let kicked = Self::drain_locked(&mut state, &Arc::new(Message::conflict()));
                if kicked > 0 {
                    debug!(channel = %self.id, kicked, "new subscriber displaced parked ones");
                }
            }
            ConcurrencyMode::Filo if !state.slots.is_empty() => {
                return Subscription::Ready(Arc::new(Message::conflict()));
            }
            _ => {}
        }

        // Walk the history oldest to newest for the first message past the
        // requested stamp. Same-second messages with an etag at or below
        // the requested one are not a match.
        let hit = state
            .queue
            .iter()
            .rev()
            .find(|m| m.stamp() > (since, etag))
            .cloned();
        if let Some(message) = hit {
            state.stats.delivered += 1;
            return Subscription::Ready(message);
        }

        if self.config.polling_mechanism == PollingMechanism::Interval {
            return Subscription::Empty;
        }

        let (tx, rx) = oneshot::channel();
        let token = state.next_token;
        state.next_token += 1;
        state.slots.push((token, tx));
        state.stats.subscribers = state.slots.len();
        Subscription::Parked(WaitSlot { token, rx })
    }

    /// Remove a parked slot, closing it without a message. Called when the
    /// poll timer fires before a publish arrives. Unknown tokens (already
    /// drained slots) are a no-op.
    pub fn unsubscribe(&self, token: u64) {
        let mut state = self.state.write();
        state.slots.retain(|(t, _)| *t != token);
        state.stats.subscribers = state.slots.len();
    }

    /// A snapshot of the channel's counters.
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.state.read().stats
    }

    /// Time of the last activity on this channel, used to order channels
    /// for garbage collection.
    #[must_use]
    pub fn stamp(&self) -> i64 {
        let stats = self.state.read().stats;
        if stats.last_requested == 0 && stats.last_published == 0 {
            stats.created
        } else {
            stats.last_requested.max(stats.last_published)
        }
    }
}
