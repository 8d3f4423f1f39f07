//! The relay: a set of channels sharing configuration, acceptor and
//! garbage collection.

use crate::acceptor::Acceptor;
use crate::channel::Channel;
use crate::config::RelayConfig;
use crate::message::{unix_seconds, Message};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use http::request::Parts;
use std::sync::Arc;
use tracing::{debug, info};

/// Owns the channel map and the policy every channel lives under.
///
/// A relay is cheap to share: handlers hold it behind an `Arc` and call
/// [`Relay::channel`] / [`Relay::get`] per request. Channel-scoped work
/// never happens under a map entry lock.
pub struct Relay {
    acceptor: Box<dyn Acceptor>,
    channels: DashMap<String, Arc<Channel>>,
    config: Arc<RelayConfig>,
}

impl Relay {
    /// Create a new relay behaving according to `config`, with `acceptor`
    /// deciding which channel each request maps to.
    #[must_use]
    pub fn new(acceptor: impl Acceptor + 'static, config: RelayConfig) -> Arc<Self> {
        Arc::new(Self {
            acceptor: Box::new(acceptor),
            channels: DashMap::new(),
            config: Arc::new(config),
        })
    }

    /// The configuration shared by every channel.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Map a request to a channel id via the acceptor. `None` means the
    /// request is rejected.
    #[must_use]
    pub fn accept(&self, parts: &Parts) -> Option<String> {
        self.acceptor.resolve(parts)
    }

    /// Return the channel with the given id, creating it if needed.
    /// The flag reports whether the channel was created by this call.
    #[must_use]
    pub fn channel(&self, id: &str) -> (Arc<Channel>, bool) {
        match self.channels.entry(id.to_string()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                debug!(channel = %id, "creating channel");
                let channel = Arc::new(Channel::new(id, Arc::clone(&self.config)));
                entry.insert(Arc::clone(&channel));
                (channel, true)
            }
        }
    }

    /// Look up an existing channel.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Channel>> {
        self.channels.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Delete a channel, waking its parked subscribers with a 410.
    ///
    /// Returns the removed channel so callers can still render its final
    /// stats, or `None` when no such channel existed.
    pub fn delete(&self, id: &str) -> Option<Arc<Channel>> {
        let (_, channel) = self.channels.remove(id)?;
        channel.drain(&Arc::new(Message::gone()));
        info!(channel = %id, "channel deleted");
        Some(channel)
    }

    /// Number of live channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the relay currently has no channels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Whether the configuration calls for a background GC tick.
    #[must_use]
    pub fn gc_enabled(&self) -> bool {
        !self.config.gc_interval.is_zero()
            && (!self.config.max_channel_idle.is_zero() || self.config.max_channels > 0)
    }

    /// Collect stale channels and enforce the soft channel cap.
    ///
    /// Channels are ordered by [`Channel::stamp`], least recently active
    /// first, and evicted while the relay is over `max_channels` or the
    /// channel has been idle past `max_channel_idle`. A zero value disables
    /// the respective criterion. Each evicted channel's parked subscribers
    /// are woken with a 410 after the channel has left the map.
    ///
    /// Sorting makes this O(N log N) in the channel count, which is fine
    /// for the thousands of channels this relay is sized for.
    pub fn gc(&self) -> usize {
        let now = unix_seconds();
        let idle_limit = if self.config.max_channel_idle.is_zero() {
            i64::MIN
        } else {
            now - self.config.max_channel_idle.as_secs() as i64
        };

        let mut entries: Vec<(String, Arc<Channel>)> = self
            .channels
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        entries.sort_by_key(|(_, channel)| channel.stamp());

        let mut count = entries.len();
        debug!(channels = count, "gc started");

        let mut evicted = Vec::new();
        for (id, channel) in entries {
            let over_cap = self.config.max_channels > 0 && count > self.config.max_channels;
            let idle = channel.stamp() < idle_limit;
            if !over_cap && !idle {
                // Entries are sorted by stamp and the count only shrinks,
                // so nothing further down can qualify either.
                break;
            }
            self.channels.remove(&id);
            count -= 1;
            evicted.push((id, channel));
        }

        let gone = Arc::new(Message::gone());
        for (id, channel) in &evicted {
            channel.drain(&gone);
            info!(channel = %id, "channel garbage collected");
        }

        debug!(evicted = evicted.len(), remaining = count, "gc finished");
        evicted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acceptor::StaticAcceptor;
    use crate::channel::Subscription;
    use crate::message::Message;
    use std::time::Duration;

    fn test_message() -> Message {
        Message::new(200, Some("text/plain".into()), b"payload".to_vec())
    }

    fn parked(sub: Subscription) -> crate::channel::WaitSlot {
        match sub {
            Subscription::Parked(slot) => slot,
            other => panic!("expected Parked, got {other:?}"),
        }
    }

    #[test]
    fn test_channel_find_or_create() {
        let relay = Relay::new(StaticAcceptor::new("static"), RelayConfig::default());
        assert!(relay.is_empty());
        assert!(relay.get("news").is_none());

        let (first, created) = relay.channel("news");
        assert!(created);
        let (second, created) = relay.channel("news");
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(relay.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_wakes_with_gone() {
        let relay = Relay::new(StaticAcceptor::new("static"), RelayConfig::default());
        let (channel, _) = relay.channel("news");
        let slot = parked(channel.subscribe(0, 0));

        let removed = relay.delete("news").expect("channel existed");
        assert!(Arc::ptr_eq(&removed, &channel));
        assert!(relay.get("news").is_none());
        assert_eq!(slot.recv().await.unwrap().status, 410);

        assert!(relay.delete("news").is_none());
    }

    #[tokio::test]
    async fn test_gc_soft_cap_evicts_least_active() {
        let config = RelayConfig {
            max_channels: 2,
            max_channel_idle: Duration::ZERO,
            ..RelayConfig::default()
        };
        let relay = Relay::new(StaticAcceptor::new("static"), config);

        let now = unix_seconds();
        let (c1, _) = relay.channel("c1");
        let (c2, _) = relay.channel("c2");
        let (c3, _) = relay.channel("c3");
        c1.publish_at(test_message(), false, now - 1_000);
        c2.publish_at(test_message(), false, now - 500);
        c3.publish_at(test_message(), false, now);

        // Park on the least-active channel without advancing its stamp.
        let slot = parked(c1.subscribe_at(0, 0, now - 1_000));

        assert_eq!(relay.gc(), 1);
        assert!(relay.get("c1").is_none());
        assert!(relay.get("c2").is_some());
        assert!(relay.get("c3").is_some());
        assert_eq!(slot.recv().await.unwrap().status, 410);
    }

    #[test]
    fn test_gc_idle_eviction() {
        let config = RelayConfig {
            max_channels: 0,
            max_channel_idle: Duration::from_secs(600),
            ..RelayConfig::default()
        };
        let relay = Relay::new(StaticAcceptor::new("static"), config);

        let now = unix_seconds();
        let (stale, _) = relay.channel("stale");
        let (fresh, _) = relay.channel("fresh");
        stale.publish_at(test_message(), false, now - 10_000);
        fresh.publish_at(test_message(), false, now);

        assert_eq!(relay.gc(), 1);
        assert!(relay.get("stale").is_none());
        assert!(relay.get("fresh").is_some());
    }

    #[test]
    fn test_gc_disabled_criteria() {
        let config = RelayConfig {
            max_channels: 0,
            max_channel_idle: Duration::ZERO,
            ..RelayConfig::default()
        };
        let relay = Relay::new(StaticAcceptor::new("static"), config);
        assert!(!relay.gc_enabled());

        // Even a long-idle channel survives when both criteria are off.
        let (channel, _) = relay.channel("old");
        channel.publish_at(test_message(), false, 1);
        assert_eq!(relay.gc(), 0);
        assert!(relay.get("old").is_some());
    }

    #[test]
    fn test_gc_enabled_gating() {
        let on = |max_channels, idle, interval| {
            let config = RelayConfig {
                max_channels,
                max_channel_idle: idle,
                gc_interval: interval,
                ..RelayConfig::default()
            };
            Relay::new(StaticAcceptor::new("static"), config).gc_enabled()
        };
        assert!(on(2, Duration::ZERO, Duration::from_secs(60)));
        assert!(on(0, Duration::from_secs(600), Duration::from_secs(60)));
        assert!(!on(2, Duration::from_secs(600), Duration::ZERO));
        assert!(!on(0, Duration::ZERO, Duration::from_secs(60)));
    }
}
