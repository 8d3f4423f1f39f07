//! # relay-core
//!
//! Channel engine for the relay server-push system.
//!
//! This crate provides the in-memory machinery behind the Basic HTTP Push
//! Relay Protocol:
//!
//! - **Message** - Immutable data packet stamped with a `(time, etag)` key
//! - **Channel** - Bounded history queue plus long-poll wait-set and stats
//! - **Relay** - Channel registry with garbage collection of idle channels
//! - **Acceptor** - Pre-flight hook mapping a request to a channel id
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Publisher  │────▶│    Relay    │────▶│   Channel   │
//! └─────────────┘     └─────────────┘     └──────┬──────┘
//!                            │                   │ wait-slots
//!                            ▼                   ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │  Acceptor   │     │ Subscribers │
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! The HTTP surface itself lives in `relay-server`; everything here is
//! transport-agnostic and exercisable directly, e.g. for embedding:
//!
//! ```rust
//! use relay_core::{Relay, RelayConfig, StaticAcceptor};
//!
//! let relay = Relay::new(StaticAcceptor::new("lobby"), RelayConfig::default());
//! let (channel, _created) = relay.channel("lobby");
//! channel.publish_text("hello, subscribers", true);
//! ```

pub mod acceptor;
pub mod channel;
pub mod config;
pub mod message;
pub mod relay;
pub mod stats;

pub use acceptor::{Acceptor, QueryParamAcceptor, StaticAcceptor};
pub use channel::{Channel, Subscription, WaitSlot};
pub use config::{ConcurrencyMode, PollingMechanism, RelayConfig};
pub use message::Message;
pub use relay::Relay;
pub use stats::{Stats, StatsFormat};
