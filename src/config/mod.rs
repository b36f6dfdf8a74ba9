//! # Configuration Management Module
//!
//! Loads, validates and persists the bridge configuration.
//!
//! ## Configuration Structure
//!
//! - [`MqttConfig`] - Broker connection and topic subscription
//! - [`ChannelConfig`] - Pre-shared channel keys used to decrypt packets
//! - [`TraccarConfig`] - Tracking server endpoints and credentials
//! - [`CacheConfig`] - Device cache limits
//! - [`LoggingConfig`] - Logging level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshtraccar::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load("config.toml").await?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!     println!("Broker: {}", config.mqtt.broker_url);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [mqtt]
//! broker_url = "mqtt://mqtt.meshtastic.org:1883"
//! topic = "msh/US/2/e/#"
//! username = "meshdev"
//! password = "large4cats"
//!
//! [channel]
//! default_key = "AQ=="
//!
//! [channel.keys]
//! Private = "base64-psk-here"
//!
//! [traccar]
//! api_url = "http://localhost:8082"
//! osmand_url = "http://localhost:5055"
//! id_prefix = "mesh-"
//! token = "..."
//!
//! [logging]
//! level = "info"
//! ```
//!
//! ## Environment Integration
//!
//! Values can be overridden via environment variables (see [`Config::apply_env_overrides`]),
//! following the precedence: CLI args > Environment > Config file > Defaults

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::fs;

use crate::meshtastic::crypto::ChannelKey;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    pub traccar: TraccarConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// `mqtt://host:port`, `tcp://host:port` or `host:port` (port defaults to 1883)
    pub broker_url: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Defaults to `meshtraccar-<pid>` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive_seconds")]
    pub keep_alive_seconds: u64,
    #[serde(default = "default_reconnect_delay_seconds")]
    pub reconnect_delay_seconds: u64,
}

fn default_topic() -> String {
    "msh/#".to_string()
}

fn default_keep_alive_seconds() -> u64 {
    30
}

fn default_reconnect_delay_seconds() -> u64 {
    5
}

impl MqttConfig {
    /// Split `broker_url` into host and port.
    pub fn host_and_port(&self) -> Result<(String, u16)> {
        let url = self.broker_url.trim();
        let url = url.trim_start_matches("mqtt://");
        let url = url.trim_start_matches("tcp://");
        let url = url.trim_end_matches('/');

        let parts: Vec<&str> = url.split(':').collect();
        match parts.as_slice() {
            [host] if !host.is_empty() => Ok((host.to_string(), 1883)),
            [host, port] if !host.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| anyhow!("Invalid port in broker URL: {}", port))?;
                Ok((host.to_string(), port))
            }
            _ => Err(anyhow!("Invalid broker URL format: {}", self.broker_url)),
        }
    }

    pub fn effective_client_id(&self) -> String {
        match &self.client_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => format!("meshtraccar-{}", std::process::id()),
        }
    }
}

/// Channel pre-shared keys, base64 encoded as in the Meshtastic apps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_channel_key")]
    pub default_key: String,
    /// Per-channel keys keyed by the envelope's channel id (e.g. "LongFast")
    #[serde(default)]
    pub keys: HashMap<String, String>,
}

fn default_channel_key() -> String {
    "AQ==".to_string()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            default_key: default_channel_key(),
            keys: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraccarConfig {
    /// Management API base URL (device lookup and creation)
    pub api_url: String,
    /// OsmAnd protocol endpoint that receives positions
    pub osmand_url: String,
    /// Prepended to device identifiers to form the Traccar unique id
    #[serde(default)]
    pub id_prefix: String,
    /// API token; takes precedence over username/password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    10
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upper bound on cached devices. Unbounded when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Parsed level; unknown strings fall back to Info.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Override file values from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Override file values from `lookup`. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MQTT_BROKER_URL") {
            self.mqtt.broker_url = v;
        }
        if let Some(v) = get("MQTT_TOPIC") {
            self.mqtt.topic = v;
        }
        if let Some(v) = get("MQTT_USERNAME") {
            self.mqtt.username = Some(v);
        }
        if let Some(v) = get("MQTT_PASSWORD") {
            self.mqtt.password = Some(v);
        }
        if let Some(v) = get("CHANNEL_KEY") {
            self.channel.default_key = v;
        }
        if let Some(v) = get("TRACCAR_API_URL") {
            self.traccar.api_url = v;
        }
        if let Some(v) = get("TRACCAR_OSMAND_URL") {
            self.traccar.osmand_url = v;
        }
        if let Some(v) = get("TRACCAR_ID_PREFIX") {
            self.traccar.id_prefix = v;
        }
        if let Some(v) = get("TRACCAR_TOKEN") {
            self.traccar.token = Some(v);
        }
        if let Some(v) = get("TRACCAR_USERNAME") {
            self.traccar.username = Some(v);
        }
        if let Some(v) = get("TRACCAR_PASSWORD") {
            self.traccar.password = Some(v);
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Reject configurations the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.broker_url.trim().is_empty() {
            return Err(anyhow!("mqtt.broker_url must not be empty"));
        }
        self.mqtt.host_and_port()?;
        if self.mqtt.topic.trim().is_empty() {
            return Err(anyhow!("mqtt.topic must not be empty"));
        }

        ChannelKey::from_base64(&self.channel.default_key)
            .map_err(|e| anyhow!("channel.default_key: {}", e))?;
        for (name, key) in &self.channel.keys {
            ChannelKey::from_base64(key).map_err(|e| anyhow!("channel.keys.{}: {}", name, e))?;
        }

        if self.traccar.api_url.trim().is_empty() {
            return Err(anyhow!("traccar.api_url must not be empty"));
        }
        if self.traccar.osmand_url.trim().is_empty() {
            return Err(anyhow!("traccar.osmand_url must not be empty"));
        }
        if self.cache.max_entries == Some(0) {
            return Err(anyhow!("cache.max_entries must be at least 1"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mqtt: MqttConfig {
                broker_url: "mqtt://mqtt.meshtastic.org:1883".to_string(),
                topic: default_topic(),
                username: Some("meshdev".to_string()),
                password: Some("large4cats".to_string()),
                client_id: None,
                keep_alive_seconds: default_keep_alive_seconds(),
                reconnect_delay_seconds: default_reconnect_delay_seconds(),
            },
            channel: ChannelConfig::default(),
            traccar: TraccarConfig {
                api_url: "http://localhost:8082".to_string(),
                osmand_url: "http://localhost:5055".to_string(),
                id_prefix: String::new(),
                token: None,
                username: None,
                password: None,
                timeout_seconds: default_timeout_seconds(),
            },
            cache: CacheConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("meshtraccar.log".to_string()),
            },
        }
    }
}
