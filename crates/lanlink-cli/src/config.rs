//! LanLink CLI Configuration Management
//!
//! Configuration is layered with figment, lowest priority first:
//! - Defaults
//! - `lanlink.toml` in the working directory
//! - The file passed with `--config`
//! - Environment variables (`LANLINK_NODE__DEVICE_NAME=desk`)
//! - Command line overrides (`--name`, `--download-dir`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use lanlink_core::LanConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "lanlink.toml";
pub const ENV_PREFIX: &str = "LANLINK_";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI: the node plus CLI-only behavior
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub node: LanConfig,
    pub cli: CliConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// JSON file answering today-summary requests in `run`
    pub summary_file: Option<PathBuf>,
    /// How long one-shot commands wait for acks and discovery
    pub linger_ms: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            summary_file: None,
            linger_ms: 3_000,
        }
    }
}

impl CliConfig {
    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}

/// Overrides taken from command line flags
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_file: Option<PathBuf>,
    pub name: Option<String>,
    pub download_dir: Option<PathBuf>,
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load with the standard priority order
    pub fn load(overrides: &Overrides) -> Result<Self, ConfigError> {
        Self::load_from(Self::base_figment(Path::new(DEFAULT_CONFIG_FILE)), overrides)
    }

    /// Load a single file over the defaults, without environment variables
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()));
        let config: AppConfig = figment.extract().map_err(|e| {
            ConfigError::Loading(format!(
                "Failed to load from {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn base_figment(default_file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(default_file))
    }

    fn load_from(mut figment: Figment, overrides: &Overrides) -> Result<Self, ConfigError> {
        if let Some(path) = &overrides.config_file {
            if !path.exists() {
                return Err(ConfigError::FileSystem(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(name) = &overrides.name {
            figment = figment.merge(("node.device_name", name.clone()));
        }
        if let Some(dir) = &overrides.download_dir {
            figment = figment.merge(("node.download_dir", dir.clone()));
        }

        let config: AppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.node.validate().map_err(ConfigError::Validation)?;
        if self.cli.linger_ms == 0 {
            return Err(ConfigError::Validation(
                "cli.linger_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Example configuration file content
    pub fn example_config() -> Result<String, ConfigError> {
        let example = AppConfig {
            node: LanConfig::default().with_device_name("my-desk"),
            cli: CliConfig {
                summary_file: Some(PathBuf::from("today.json")),
                ..CliConfig::default()
            },
        };
        toml::to_string_pretty(&example)
            .map_err(|e| ConfigError::Serialization(format!("Failed to serialize config: {}", e)))
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
