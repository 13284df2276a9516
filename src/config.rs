//! Runtime configuration
//!
//! Defaults, then an optional JSON file, then `THREATLOOP_*` environment
//! overrides. Read once at startup.

use crate::plugin::PluginConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "threatloop.json";
const ENV_PREFIX: &str = "THREATLOOP_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Non-benign verdicts at or above this confidence raise an alert
    pub confidence_threshold: f64,
    pub log_path: PathBuf,
    pub probe_timeout_ms: u64,
    pub http_timeout_ms: u64,
    /// Wall-clock budget for a single plugin run
    pub plugin_budget_ms: u64,
    pub geo_endpoint: String,
    pub session_id: String,
    /// Delay between replayed payloads
    pub feed_interval_ms: u64,
    /// Capacity of the feed → command loop channel
    pub feed_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            confidence_threshold: 60.0,
            log_path: PathBuf::from(crate::memory::DEFAULT_LOG_PATH),
            probe_timeout_ms: 1000,
            http_timeout_ms: 3000,
            plugin_budget_ms: 10_000,
            geo_endpoint: "http://ip-api.com/json/".to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            feed_interval_ms: 200,
            feed_buffer: 64,
        }
    }
}

impl Config {
    /// Load from `path`, or from `threatloop.json` if present, then apply env overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        serde_json::from_str(&json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply overrides from a key lookup (env vars in production)
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = parse_value("CONFIDENCE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("LOG_PATH") {
            self.log_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PROBE_TIMEOUT_MS") {
            self.probe_timeout_ms = parse_value("PROBE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("HTTP_TIMEOUT_MS") {
            self.http_timeout_ms = parse_value("HTTP_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("GEO_ENDPOINT") {
            self.geo_endpoint = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold must be within 0..=100, got {}",
                self.confidence_threshold
            )));
        }
        if self.probe_timeout_ms == 0 || self.http_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.feed_buffer == 0 {
            return Err(ConfigError::Invalid("feed_buffer must be non-zero".into()));
        }
        Ok(())
    }

    pub fn plugin_config(&self) -> PluginConfig {
        PluginConfig {
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            http_timeout: Duration::from_millis(self.http_timeout_ms),
            run_budget: Duration::from_millis(self.plugin_budget_ms),
            ports: None,
            geo_endpoint: self.geo_endpoint.clone(),
        }
    }

    /// Whether a verdict at this confidence warrants an alert
    pub fn is_alert(&self, verdict: &crate::model::Verdict, confidence: f64) -> bool {
        verdict.is_threat() && confidence >= self.confidence_threshold
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{}{}={:?}", ENV_PREFIX, key, raw)))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file {0}: {1}")]
    Read(String, #[source] std::io::Error),

    #[error("Cannot parse config: {0}")]
    Parse(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}
