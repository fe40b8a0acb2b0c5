//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - flowquery.toml (default configuration)
//! - flowquery.local.toml (git-ignored local overrides)
//! - Environment variables (FLOWQUERY_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # flowquery.toml
//! [loader]
//! timeout_secs = 30
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! FLOWQUERY_LOADER__TIMEOUT_SECS=10
//! FLOWQUERY_LOGGING__LEVEL=debug
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub repl: ReplConfig,
}

/// HTTP loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// REPL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplConfig {
    /// Prompt for the first line of a statement
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// Prompt for continuation lines
    #[serde(default = "default_continuation_prompt")]
    pub continuation_prompt: String,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_prompt() -> String {
    "> ".to_string()
}
fn default_continuation_prompt() -> String {
    "... ".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. flowquery.toml (base configuration)
    /// 2. flowquery.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (FLOWQUERY_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("flowquery.toml"))
            .merge(Toml::file("flowquery.local.toml"))
            .merge(Env::prefixed("FLOWQUERY_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("FLOWQUERY_").split("__"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            loader: LoaderConfig::default(),
            logging: LoggingConfig::default(),
            repl: ReplConfig::default(),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl Default for ReplConfig {
    fn default() -> Self {
        ReplConfig {
            prompt: default_prompt(),
            continuation_prompt: default_continuation_prompt(),
        }
    }
}
