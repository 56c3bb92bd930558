//! Server configuration types
//!
//! Contains all configuration structures for the Kiln server.

use anyhow::{Context, Result};
use kiln_core::{DockerConfig, QueueConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub event_log: EventLogConfig,
    #[serde(default)]
    pub builder: DockerConfig,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            queue: QueueConfig::default(),
            storage: StorageConfig::default(),
            event_log: EventLogConfig::default(),
            builder: DockerConfig::default(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl AppConfig {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Run every validator; returns all problems found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let checks = [
            ConfigValidator::validate_port(self.server.port),
            ConfigValidator::validate_nonzero("queue.capacity", self.queue.capacity),
            ConfigValidator::validate_nonzero("queue.max_concurrent", self.queue.max_concurrent),
            ConfigValidator::validate_storage_backend(&self.storage.backend),
            ConfigValidator::validate_event_log_backend(&self.event_log.backend),
            ConfigValidator::validate_nonzero("event_log.partitions", self.event_log.partitions),
            ConfigValidator::validate_nonzero(
                "event_log.max_pending_sends",
                self.event_log.max_pending_sends,
            ),
            ConfigValidator::validate_nonzero("event_log.buffer", self.event_log.buffer),
        ];
        let errors: Vec<String> = checks.into_iter().filter_map(|c| c.err()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Build record storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `sqlite` or `memory`
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// SQLite database file
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_backend() -> String {
    "sqlite".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/kiln.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

/// Event log transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// `memory` or `redis`
    #[serde(default = "default_event_log_backend")]
    pub backend: String,
    /// Stream name prefix (redis)
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    /// Events buffered ahead of the transport before publishing fails fast
    #[serde(default = "default_max_pending_sends")]
    pub max_pending_sends: usize,
    /// Records a memory-log consumer may fall behind per partition before it
    /// is closed (memory)
    #[serde(default = "default_buffer")]
    pub buffer: usize,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Delay between empty stream reads (redis)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Approximate retained entries per partition stream (redis)
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

fn default_event_log_backend() -> String {
    "memory".to_string()
}

fn default_topic() -> String {
    "kiln-build-events".to_string()
}

fn default_partitions() -> usize {
    4
}

fn default_max_pending_sends() -> usize {
    1024
}

fn default_buffer() -> usize {
    4096
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_max_len() -> usize {
    100_000
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            backend: default_event_log_backend(),
            topic: default_topic(),
            partitions: default_partitions(),
            max_pending_sends: default_max_pending_sends(),
            buffer: default_buffer(),
            redis_url: default_redis_url(),
            poll_interval_ms: default_poll_interval_ms(),
            max_len: default_max_len(),
        }
    }
}

// ============================================================================
// Shared Configuration Validator
// ============================================================================

/// Shared validation logic for the server and the `config` CLI
pub struct ConfigValidator;

impl ConfigValidator {
    const VALID_STORAGE_BACKENDS: &[&str] = &["sqlite", "memory"];

    const VALID_EVENT_LOG_BACKENDS: &[&str] = &["memory", "redis"];

    pub fn validate_storage_backend(s: &str) -> Result<(), String> {
        if Self::VALID_STORAGE_BACKENDS.contains(&s) {
            Ok(())
        } else {
            Err(format!(
                "Invalid storage backend '{}'. Valid: {}",
                s,
                Self::VALID_STORAGE_BACKENDS.join(", ")
            ))
        }
    }

    pub fn validate_event_log_backend(s: &str) -> Result<(), String> {
        if Self::VALID_EVENT_LOG_BACKENDS.contains(&s) {
            Ok(())
        } else {
            Err(format!(
                "Invalid event log backend '{}'. Valid: {}",
                s,
                Self::VALID_EVENT_LOG_BACKENDS.join(", ")
            ))
        }
    }

    pub fn validate_port(p: u16) -> Result<(), String> {
        if p == 0 {
            Err("Port cannot be 0".to_string())
        } else {
            Ok(())
        }
    }

    pub fn validate_nonzero(key: &str, value: usize) -> Result<(), String> {
        if value == 0 {
            Err(format!("{} must be greater than 0", key))
        } else {
            Ok(())
        }
    }
}
