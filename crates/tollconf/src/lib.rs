//! Minimal configuration loading for Tollbooth.
//!
//! This crate provides configuration loading with minimal dependencies,
//! designed to be imported by every Tollbooth crate without dragging the
//! runtime stack along.
//!
//! # Layering
//!
//! Three file tiers merge over the compiled defaults, most specific last:
//! machine (`/etc/tollbooth/config.toml`), user
//! (`~/.config/tollbooth/config.toml`), and working directory
//! (`./tollbooth.toml`, replaced by `--config` when given). `TOLLBOOTH_*`
//! environment variables override everything.
//!
//! # Example Config
//!
//! ```toml
//! [database]
//! host = "db.internal"
//! name = "tollbooth"
//!
//! [http]
//! port = 8089
//!
//! [auth]
//! jwt_secret = "change-me"
//!
//! [heartbeat]
//! interval = "10s"
//! error_increment = "5s"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{config_file_candidates, ConfigSources};
pub use sections::{
    AuthConfig, DatabaseConfig, HeartbeatConfig, HttpConfig, MailConfig, MetricsConfig,
    ProxyConfig, RateLimitConfig, StripeConfig, TelemetryConfig,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete Tollbooth configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TollConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub stripe: StripeConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub mail: MailConfig,
}

impl TollConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about sources.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        // The standard tiers are optional, but a path the operator named
        // explicitly must exist
        if let Some(path) = config_path {
            if !path.is_file() {
                return Err(ConfigError::FileRead {
                    path: path.to_path_buf(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
        }

        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();
        let mut last_path = PathBuf::from("tollbooth.toml");

        for path in loader::config_file_candidates(config_path) {
            if !path.is_file() {
                continue;
            }
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            last_path = path.clone();
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, &last_path)?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string, for `--show-config`.
    pub fn to_toml(&self) -> String {
        let header = "# Tollbooth Configuration\n\n";
        match toml::to_string_pretty(self) {
            Ok(body) => format!("{header}{body}"),
            Err(e) => format!("{header}# serialization error: {e}\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TollConfig::default();
        assert_eq!(config.http.port, 8089);
        assert_eq!(config.metrics.port, 2112);
        assert_eq!(config.heartbeat.health_path, "/hc");
        assert_eq!(config.proxy.no_role_redirect_url, "/pricing");
    }

    #[test]
    fn test_to_toml() {
        let config = TollConfig::default();
        let toml = config.to_toml();
        assert!(toml.contains("[database]"));
        assert!(toml.contains("[http]"));
        assert!(toml.contains("[heartbeat]"));
    }

    #[test]
    fn test_parse_partial_sections() {
        let table: toml::Table = r#"
[http]
port = 9000

[auth]
jwt_secret = "s3cret"
"#
        .parse()
        .unwrap();
        let config =
            loader::from_table(table, Path::new("test.toml")).expect("partial config parses");
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.auth.jwt_secret, "s3cret");
        // Untouched sections keep their defaults
        assert_eq!(config.metrics.port, 2112);
        assert_eq!(config.rate_limit.per_second, 25);
    }
}
