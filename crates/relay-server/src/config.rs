//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (RELAY_HOST, RELAY_PORT)
//! - TOML configuration file

use anyhow::{Context, Result};
use relay_core::{ConcurrencyMode, PollingMechanism, RelayConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Endpoint paths and channel addressing.
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Relay behavior knobs.
    #[serde(default)]
    pub relay: RelayOptions,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// Path of the publisher endpoint.
    #[serde(default = "default_publisher_path")]
    pub publisher_path: String,

    /// Path of the subscriber endpoint.
    #[serde(default = "default_subscriber_path")]
    pub subscriber_path: String,

    /// Query parameter carrying the channel id.
    #[serde(default = "default_channel_param")]
    pub channel_param: String,
}

/// Relay behavior knobs, the file-format rendering of
/// [`relay_core::RelayConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayOptions {
    /// Whether the subscriber endpoint may create channels.
    #[serde(default)]
    pub allow_channel_creation: bool,

    /// Maximum queued messages per channel; 0 disables queueing.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Behavior of channels under concurrent subscribers.
    #[serde(default)]
    pub concurrency_mode: ConcurrencyMode,

    /// Overrides the content-type of published messages when set.
    #[serde(default)]
    pub content_type: Option<String>,

    /// Seconds between garbage collection runs; 0 disables GC.
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,

    /// Soft cap on the number of channels; 0 disables.
    #[serde(default)]
    pub max_channels: usize,

    /// Seconds a channel may stay idle before collection; 0 disables.
    #[serde(default = "default_max_channel_idle_secs")]
    pub max_channel_idle_secs: u64,

    /// Behavior of subscriber response cycles.
    #[serde(default)]
    pub polling_mechanism: PollingMechanism,

    /// Milliseconds a long-poll request stays parked; 0 waits forever.
    #[serde(default = "default_polling_timeout_ms")]
    pub polling_timeout_ms: u64,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum publish body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("RELAY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("RELAY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_publisher_path() -> String {
    "/pub".to_string()
}

fn default_subscriber_path() -> String {
    "/sub".to_string()
}

fn default_channel_param() -> String {
    "channel".to_string()
}

fn default_channel_capacity() -> usize {
    20
}

fn default_gc_interval_secs() -> u64 {
    60
}

fn default_max_channel_idle_secs() -> u64 {
    600
}

fn default_polling_timeout_ms() -> u64 {
    20_000
}

fn default_max_body_bytes() -> usize {
    64 * 1024 // 64 KB
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            endpoints: EndpointsConfig::default(),
            relay: RelayOptions::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            publisher_path: default_publisher_path(),
            subscriber_path: default_subscriber_path(),
            channel_param: default_channel_param(),
        }
    }
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            allow_channel_creation: false,
            channel_capacity: default_channel_capacity(),
            concurrency_mode: ConcurrencyMode::default(),
            content_type: None,
            gc_interval_secs: default_gc_interval_secs(),
            max_channels: 0,
            max_channel_idle_secs: default_max_channel_idle_secs(),
            polling_mechanism: PollingMechanism::default(),
            polling_timeout_ms: default_polling_timeout_ms(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "relay.toml",
            "/etc/relay/relay.toml",
            "~/.config/relay/relay.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error when host and port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// The channel-engine view of this configuration.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            allow_channel_creation: self.relay.allow_channel_creation,
            channel_capacity: self.relay.channel_capacity,
            concurrency_mode: self.relay.concurrency_mode,
            content_type: self.relay.content_type.clone(),
            gc_interval: Duration::from_secs(self.relay.gc_interval_secs),
            max_channels: self.relay.max_channels,
            max_channel_idle: Duration::from_secs(self.relay.max_channel_idle_secs),
            polling_mechanism: self.relay.polling_mechanism,
            poll_timeout: Duration::from_millis(self.relay.polling_timeout_ms),
        }
    }
}
