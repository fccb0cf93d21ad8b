//! Application configuration management.
//!
//! Configuration is loaded from an optional YAML file with environment variable overrides. The
//! configuration file path defaults to `config.yaml` but can be specified via `-f` flag or
//! `WAVSTORE_CONFIG` environment variable. A missing file is not an error: every field has a
//! default, so the service starts with no configuration at all.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `WAVSTORE_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `WAVSTORE_STORAGE__MAX_FILE_SIZE=1048576` sets the `storage.max_file_size` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use wavstore::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! WAVSTORE_PORT=9000
//! WAVSTORE_STORAGE__DIRECTORY=/var/lib/wavstore
//! WAVSTORE_ENABLE_METRICS=false
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "WAVSTORE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// Built once at startup and handed to [`crate::Application`]; handlers read it through
/// [`crate::AppState`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Stored file configuration
    pub storage: StorageConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Where uploads land and what is accepted.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory holding every stored file, created at startup if absent
    pub directory: PathBuf,
    /// Maximum upload size in bytes (default: 15 MiB)
    pub max_file_size: u64,
    /// Accepted filename extensions, including the leading dot. Compared case-insensitively.
    pub allowed_extensions: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("uploads"),
            max_file_size: 15 * 1024 * 1024, // 15MiB
            allowed_extensions: vec![".wav".to_string()],
        }
    }
}

impl StorageConfig {
    /// Allowed extensions joined for display in error messages, e.g. `.wav, .wave`
    pub fn allowed_extensions_display(&self) -> String {
        self.allowed_extensions.join(", ")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            storage: StorageConfig::default(),
            enable_metrics: true,
            enable_otel_export: false,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.storage.directory.as_os_str().is_empty() {
            return Err(Error::Other(anyhow::anyhow!(
                "Config validation: storage.directory cannot be empty"
            )));
        }

        if self.storage.max_file_size == 0 {
            return Err(Error::Other(anyhow::anyhow!(
                "Config validation: storage.max_file_size must be greater than 0"
            )));
        }

        if self.storage.allowed_extensions.is_empty() {
            return Err(Error::Other(anyhow::anyhow!(
                "Config validation: storage.allowed_extensions must list at least one extension"
            )));
        }

        if let Some(bad) = self
            .storage
            .allowed_extensions
            .iter()
            .find(|ext| !ext.starts_with('.') || ext.len() < 2)
        {
            return Err(Error::Other(anyhow::anyhow!(
                "Config validation: allowed extension '{}' must start with '.' and name a suffix",
                bad
            )));
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables override specific values. WAVSTORE_CONFIG names the file
            // itself and is consumed by `Args`, not a config key.
            .merge(Env::prefixed("WAVSTORE_").ignore(&["CONFIG"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
