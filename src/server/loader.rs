//! Layered configuration
//!
//! Sources, lowest priority first:
//! 1. `config/default.toml` compiled into the binary
//! 2. `default`, `{KILN_ENV}` and `local` files in the config directory, each optional
//! 3. `KILN_*` environment variables, `__` between nested keys
//!    (`KILN_QUEUE__CAPACITY=16`)

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::Path;

/// Embedded default configuration
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

const CONFIG_DIR: &str = "config";
const ENV_PREFIX: &str = "KILN";

/// Name of the selected configuration environment (`KILN_ENV`)
pub fn environment_name() -> String {
    std::env::var("KILN_ENV").unwrap_or_else(|_| "development".to_string())
}

/// Load configuration from `./config` and the process environment
pub fn load_config() -> Result<AppConfig> {
    load_config_from(Path::new(CONFIG_DIR), &environment_name())
}

/// Load configuration with overlay files taken from `dir`
pub fn load_config_from(dir: &Path, environment: &str) -> Result<AppConfig> {
    let overlays = ["default", environment, "local"];

    let mut builder =
        Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));
    for name in overlays {
        builder = builder.add_source(File::from(dir.join(name)).required(false));
    }

    // config-rs 0.14 joins prefix and key with the key separator unless told
    // otherwise, which would require KILN__QUEUE__CAPACITY.
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    builder
        .build()
        .with_context(|| format!("Failed to read configuration from {}", dir.display()))?
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_embedded_defaults_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(dir.path(), "test").unwrap();
        assert_eq!(config.queue.capacity, 64);
        assert_eq!(config.event_log.backend, "memory");
    }

    #[test]
    fn test_overlays_apply_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[server]\nport = 9000\n[queue]\ncapacity = 8\n",
        )
        .unwrap();
        fs::write(dir.path().join("staging.toml"), "[server]\nport = 9100\n").unwrap();
        fs::write(dir.path().join("local.toml"), "[queue]\nmax_concurrent = 2\n").unwrap();

        let config = load_config_from(dir.path(), "staging").unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.queue.capacity, 8);
        assert_eq!(config.queue.max_concurrent, 2);
        assert_eq!(config.storage.backend, "sqlite");
    }

    #[test]
    fn test_malformed_overlay_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("local.toml"), "[queue\ncapacity = ").unwrap();
        assert!(load_config_from(dir.path(), "test").is_err());
    }
}
