//! Configuration management for the order linker.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broker API credentials and endpoints
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Trigger watcher and order-book poller timing
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Order-update stream settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Order placement parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Session access token
    #[serde(default)]
    pub access_token: String,
    /// REST API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Order-update websocket URL
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl BrokerConfig {
    /// Both credentials are present.
    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.access_token.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Interval between trigger-status polls in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Timeout for a single poll in seconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    /// Also scan the order book for completed buys the stream may have missed
    #[serde(default = "default_order_poll_enabled")]
    pub order_poll_enabled: bool,
    /// Interval between order-book scans in milliseconds
    #[serde(default = "default_order_poll_interval_ms")]
    pub order_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Buffered order updates between the socket reader and the dispatcher
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Websocket connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Order submission timeout in seconds
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,
    /// Pause between consecutive submissions in milliseconds
    #[serde(default = "default_place_pause_ms")]
    pub place_pause_ms: u64,
    /// Report what would be placed without submitting anything
    #[serde(default)]
    pub dry_run: bool,
}

// Default value functions
fn default_api_url() -> String {
    "https://api.kite.trade".to_string()
}

fn default_ws_url() -> String {
    "wss://ws.kite.trade".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_poll_timeout() -> u64 {
    10
}

fn default_order_poll_enabled() -> bool {
    true
}

fn default_order_poll_interval_ms() -> u64 {
    2_000
}

fn default_channel_capacity() -> usize {
    1_024
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_submit_timeout() -> u64 {
    15
}

fn default_place_pause_ms() -> u64 {
    200 // broker rate limit headroom
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("OLK"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.watcher.poll_interval_ms > 0,
            "watcher.poll_interval_ms must be greater than 0"
        );

        anyhow::ensure!(
            self.watcher.poll_timeout_secs > 0,
            "watcher.poll_timeout_secs must be greater than 0"
        );

        anyhow::ensure!(
            !self.watcher.order_poll_enabled || self.watcher.order_poll_interval_ms > 0,
            "watcher.order_poll_interval_ms must be greater than 0 when order polling is enabled"
        );

        anyhow::ensure!(
            self.dispatcher.channel_capacity > 0,
            "dispatcher.channel_capacity must be greater than 0"
        );

        anyhow::ensure!(
            self.execution.submit_timeout_secs > 0,
            "execution.submit_timeout_secs must be greater than 0"
        );

        anyhow::ensure!(
            self.broker.api_url.starts_with("http"),
            "broker.api_url must be an http(s) URL"
        );

        anyhow::ensure!(
            self.broker.ws_url.starts_with("ws"),
            "broker.ws_url must be a ws(s) URL"
        );

        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            access_token: String::new(),
            api_url: default_api_url(),
            ws_url: default_ws_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_secs: default_poll_timeout(),
            order_poll_enabled: default_order_poll_enabled(),
            order_poll_interval_ms: default_order_poll_interval_ms(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            submit_timeout_secs: default_submit_timeout(),
            place_pause_ms: default_place_pause_ms(),
            dry_run: false,
        }
    }
}
