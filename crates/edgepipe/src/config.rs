// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline configuration.
//!
//! Loaded from TOML or built from command-line flags. Every field has a
//! default, so a partial file is valid.

use crate::delivery::DeliveryConfig;
use crate::source::DEFAULT_CAPACITY;
use crate::transcode::TranscoderConfig;
use crate::transport::{ConnectOptions, Qos};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Smallest accepted input buffer.
pub const MIN_BUFFER_CAPACITY: usize = 64;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How input records become payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// Pre-rendered messages split on the delimiter, published unchanged.
    #[default]
    Delimited,
    /// Raw telemetry stanzas, transcoded to JSON.
    Telemetry,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub transcoder: TranscoderConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Statistics reporting interval (seconds, 0 disables).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    10
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            broker: BrokerConfig::default(),
            publish: PublishConfig::default(),
            transcoder: TranscoderConfig::default(),
            log_level: default_log_level(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

/// `[source]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Input file. Absent means standard input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Input buffer size, which is also the longest accepted record.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Record delimiter for the delimited format.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    #[serde(default)]
    pub format: InputFormat,
}

fn default_buffer_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_delimiter() -> String {
    "\n".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: None,
            buffer_capacity: default_buffer_capacity(),
            delimiter: default_delimiter(),
            format: InputFormat::default(),
        }
    }
}

/// `[broker]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Client identifier. Defaults to the hostname plus a timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

/// `[publish]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default)]
    pub qos: Qos,

    #[serde(default)]
    pub retain: bool,

    /// Publish attempts per message.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Publish outcome timeout (milliseconds, 0 waits forever).
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,

    #[serde(default = "default_idle_sleep")]
    pub idle_sleep_ms: u64,

    #[serde(default = "default_disconnect_timeout")]
    pub disconnect_timeout_ms: u64,
}

fn default_topic() -> String {
    "test".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_queue_capacity() -> usize {
    20
}

fn default_publish_timeout() -> u64 {
    30_000
}

fn default_idle_sleep() -> u64 {
    2
}

fn default_disconnect_timeout() -> u64 {
    2000
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            qos: Qos::default(),
            retain: false,
            max_attempts: default_max_attempts(),
            queue_capacity: default_queue_capacity(),
            publish_timeout_ms: default_publish_timeout(),
            idle_sleep_ms: default_idle_sleep(),
            disconnect_timeout_ms: default_disconnect_timeout(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let source = &self.source;
        if source.delimiter.is_empty() {
            return Err(ConfigError::Invalid("delimiter must not be empty".into()));
        }
        check_buffer_capacity(source.buffer_capacity)?;
        if source.delimiter.len() >= source.buffer_capacity {
            return Err(ConfigError::Invalid(
                "delimiter must be shorter than buffer_capacity".into(),
            ));
        }

        if self.broker.host.is_empty() {
            return Err(ConfigError::Invalid("broker host must not be empty".into()));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::Invalid("broker port must not be 0".into()));
        }

        let publish = &self.publish;
        if publish.topic.is_empty() {
            return Err(ConfigError::Invalid("topic must not be empty".into()));
        }
        if publish.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if publish.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".into()));
        }

        self.transcoder.validate().map_err(ConfigError::Invalid)
    }

    /// Session parameters for the transport.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            client_id: self
                .broker
                .client_id
                .clone()
                .unwrap_or_else(default_client_id),
            username: self.broker.username.clone(),
            password: self.broker.password.clone(),
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
            clean_session: true,
            connect_timeout: Duration::from_millis(self.broker.connect_timeout_ms),
        }
    }

    /// Settings for [`DeliveryEngine`](crate::delivery::DeliveryEngine) and
    /// [`SyncPublisher`](crate::publisher::SyncPublisher).
    pub fn delivery_config(&self) -> DeliveryConfig {
        let publish = &self.publish;
        DeliveryConfig {
            topic: publish.topic.clone(),
            qos: publish.qos,
            retain: publish.retain,
            max_attempts: publish.max_attempts,
            queue_capacity: publish.queue_capacity,
            idle_sleep: Duration::from_millis(publish.idle_sleep_ms),
            publish_timeout: (publish.publish_timeout_ms > 0)
                .then(|| Duration::from_millis(publish.publish_timeout_ms)),
            disconnect_timeout: Duration::from_millis(publish.disconnect_timeout_ms),
            connect: self.connect_options(),
        }
    }
}

/// Reject input buffers smaller than [`MIN_BUFFER_CAPACITY`].
pub fn check_buffer_capacity(capacity: usize) -> Result<(), ConfigError> {
    if capacity < MIN_BUFFER_CAPACITY {
        return Err(ConfigError::Invalid(format!(
            "buffer_capacity {} is below the minimum of {}",
            capacity, MIN_BUFFER_CAPACITY
        )));
    }
    Ok(())
}

/// Client identifier built from the hostname and the current Unix time.
pub fn default_client_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{}-{}", hostname::get(), secs)
}

/// Expand `\n`, `\r`, `\t`, `\0` and `\\` in a delimiter given on the
/// command line. Other backslash sequences are kept verbatim.
pub fn unescape_delimiter(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

// Hostname helper (simple implementation)
mod hostname {
    pub fn get() -> String {
        from_libc()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .or_else(|| std::env::var("HOST").ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }

    #[cfg(unix)]
    fn from_libc() -> Option<String> {
        let mut buf = vec![0u8; 256];
        let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
        if ret != 0 {
            return None;
        }
        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        buf.truncate(len);
        String::from_utf8(buf).ok()
    }

    #[cfg(not(unix))]
    fn from_libc() -> Option<String> {
        None
    }
}
