use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::core::{EngineConfig, MatchingConfig, OfferConfig, SurgeConfig};
use crate::models::ScoringWeights;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub matching: MatchingConfig,
    pub surge: SurgeConfig,
    pub scoring: ScoringSettings,
    pub offers: OfferConfig,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: None,
        }
    }
}

/// Without a URL the service keeps all state in memory
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoringSettings {
    #[serde(default)]
    pub weights: ScoringWeights,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "compact".to_string() }

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the structs
    /// 2. Configuration files (config/default.toml, then config/local.toml)
    /// 3. Environment variables (prefixed with DISPATCH__)
    /// 4. DATABASE_URL, if set
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // e.g., DISPATCH__SERVER__PORT -> server.port
            .add_source(environment());

        with_database_url(builder)?.build()?.try_deserialize()
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(environment());

        with_database_url(builder)?.build()?.try_deserialize()
    }

    /// Per-component settings for the engine
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            matching: self.matching.clone(),
            surge: self.surge.clone(),
            weights: self.scoring.weights,
            offers: self.offers.clone(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix("DISPATCH")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

/// The conventional DATABASE_URL wins over every other source
fn with_database_url(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    match std::env::var("DATABASE_URL") {
        Ok(url) if !url.is_empty() => builder.set_override("database.url", url),
        _ => Ok(builder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_weights() {
        let settings = Settings::default();
        let weights = settings.engine_config().weights;
        assert_eq!(weights.distance, 0.30);
        assert_eq!(weights.tier, 0.25);
        assert_eq!(weights.vehicle, 0.20);
        assert_eq!(weights.rating, 0.15);
        assert_eq!(weights.availability, 0.10);
    }

    #[test]
    fn test_default_logging() {
        let logging = LoggingSettings::default();
        assert_eq!(logging.level, "info");
        assert_eq!(logging.format, "compact");
    }

    #[test]
    fn test_load_from_file_keeps_unset_defaults() {
        let path = std::env::temp_dir().join(format!("dispatch-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[matching]\ntop_n = 7\n\n[offers]\ntimeout_minutes = 3\n\n[surge]\nvip_cap = 1.8"
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.matching.top_n, 7);
        assert_eq!(settings.matching.rematch_top_n, 3);
        assert_eq!(settings.offers.timeout_minutes, 3);
        assert_eq!(settings.surge.vip_cap, 1.8);
        assert_eq!(settings.surge.premium_cap, 2.5);
        assert_eq!(settings.server.port, 8080);
    }
}
