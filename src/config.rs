//! Runtime configuration, read from `fieldmon.toml`.
//!
//! Every section is optional; anything left out falls back to the built-in
//! defaults. The path comes from `FIELDMON_CONFIG`, otherwise
//! `config/fieldmon.toml` is tried, otherwise defaults are used.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::liveness::{Threshold, DEFAULT_THRESHOLD_SECONDS};
use crate::report::ReportSettings;
use crate::sensor::{LivenessPolicy, StreamDescriptor};
use crate::window::{self, DEFAULT_WINDOW_HOURS};

pub const CONFIG_ENV: &str = "FIELDMON_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default = "default_streams")]
    pub streams: Vec<StreamDescriptor>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Directory holding the built dashboard.
    pub static_dir: String,
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LivenessConfig {
    pub threshold_seconds: i64,
    pub window_hours: i64,
    pub policy: LivenessPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "0.0.0.0:8080".to_string(),
            static_dir: "./app/".to_string(),
            shutdown_timeout_secs: 60,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig { path: "./database.sqlite3".to_string() }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        LivenessConfig {
            threshold_seconds: DEFAULT_THRESHOLD_SECONDS,
            window_hours: DEFAULT_WINDOW_HOURS,
            policy: LivenessPolicy::AnyFresh,
        }
    }
}

pub fn default_streams() -> Vec<StreamDescriptor> {
    vec![
        StreamDescriptor::new("temperature", "Temperature", "°C", -40.0, 85.0),
        StreamDescriptor::new("humidity", "Humidity", "%", 0.0, 100.0),
        StreamDescriptor::new("soil_moisture", "Soil moisture", "%", 0.0, 100.0),
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            liveness: LivenessConfig::default(),
            streams: default_streams(),
        }
    }
}

impl AppConfig {
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|source| ConfigError::Read { path: path.as_ref().to_path_buf(), source })?;
        Self::parse(&content)
    }

    /// An explicitly configured path must load; the default location may be absent.
    pub fn locate() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            info!("Loading config from {} ({})", path, CONFIG_ENV);
            return Self::load(path);
        }

        let path = PathBuf::from("config").join("fieldmon.toml");
        if path.exists() {
            info!("Loading config from {}", path.display());
            Self::load(path)
        } else {
            warn!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streams.is_empty() {
            return Err(ConfigError::Invalid("at least one stream is required".to_string()));
        }

        let mut seen = HashSet::new();
        for stream in &self.streams {
            if stream.id.is_empty() {
                return Err(ConfigError::Invalid("stream id must not be empty".to_string()));
            }
            if !seen.insert(stream.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate stream id {:?}", stream.id)));
            }
            if !(stream.valid_min < stream.valid_max) {
                return Err(ConfigError::Invalid(format!(
                    "stream {:?} has an empty valid range [{}, {}]",
                    stream.id, stream.valid_min, stream.valid_max
                )));
            }
        }

        if self.liveness.threshold_seconds <= 0 {
            return Err(ConfigError::Invalid("liveness.threshold_seconds must be positive".to_string()));
        }
        if window::clamp_hours(self.liveness.window_hours) != self.liveness.window_hours {
            return Err(ConfigError::Invalid(format!(
                "liveness.window_hours must be within [{}, {}]",
                window::MIN_WINDOW_HOURS, window::MAX_WINDOW_HOURS
            )));
        }
        Ok(())
    }

    pub fn report_settings(&self) -> ReportSettings {
        ReportSettings {
            threshold: Threshold::from(self.liveness.threshold_seconds),
            window_hours: self.liveness.window_hours,
            policy: self.liveness.policy,
        }
    }

    pub fn log_summary(&self) {
        info!("Listening on {}, serving dashboard from {}", self.server.bind, self.server.static_dir);
        info!("Database at {}", self.database.path);
        info!(
            "Liveness threshold {}s, window {}h, policy {:?}",
            self.liveness.threshold_seconds, self.liveness.window_hours, self.liveness.policy
        );
        for stream in &self.streams {
            info!("Stream {} ({}) [{}, {}] {}", stream.id, stream.label, stream.valid_min, stream.valid_max, stream.unit);
        }
    }
}
