//! # relay-server
//!
//! HTTP surface for the relay: the publisher and subscriber endpoints,
//! server configuration, and Prometheus metrics around the channel engine
//! from `relay-core`.

pub mod config;
pub mod handlers;
pub mod metrics;
