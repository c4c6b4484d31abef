use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::compress::CompressionConfig;
use crate::decoder::DecodePolicy;

pub const API_KEY_ENV: &str = "ROBOFLOW_API_KEY";
pub const MODEL_ID_ENV: &str = "ROBOFLOW_MODEL_ID";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub detector: DetectorConfig,
    pub policy: DecodePolicy,
    pub compression: CompressionConfig,
    pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub log_level: String,
    /// Largest accepted JSON body or multipart upload.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            max_body_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Hosted detector access. Both `model_id` and `api_key` must be present for
/// requests to be forwarded.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub endpoint: String,
    pub model_id: Option<String>,
    pub api_key: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://detect.roboflow.com".to_string(),
            model_id: None,
            api_key: None,
        }
    }
}

impl DetectorConfig {
    /// `(model_id, api_key)` when both are set and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let model_id = self.model_id.as_deref().filter(|s| !s.is_empty())?;
        let api_key = self.api_key.as_deref().filter(|s| !s.is_empty())?;
        Some((model_id, api_key))
    }

    /// Fills credentials the file left out, e.g. from the process environment.
    pub fn fill_missing(&mut self, model_id: Option<String>, api_key: Option<String>) {
        if self.model_id.is_none() {
            self.model_id = model_id;
        }
        if self.api_key.is_none() {
            self.api_key = api_key;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// TTF/OTF used for box labels. Without it only boxes are drawn.
    pub font_path: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let policy = &self.policy;
        if !validate_unit(policy.high_threshold)
            || !validate_unit(policy.mid_threshold)
            || !validate_unit(policy.min_confidence)
        {
            return Err(ConfigError::Invalid(
                "policy thresholds must lie in [0, 1]".into(),
            ));
        }
        if policy.mid_threshold > policy.high_threshold {
            return Err(ConfigError::Invalid(
                "policy.mid_threshold must not exceed policy.high_threshold".into(),
            ));
        }
        if self.compression.max_edge == 0 {
            return Err(ConfigError::Invalid(
                "compression.max_edge must be positive".into(),
            ));
        }
        if !(1..=100).contains(&self.compression.quality) {
            return Err(ConfigError::Invalid(
                "compression.quality must be within 1..=100".into(),
            ));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_body_bytes must be positive".into(),
            ));
        }
        if self.detector.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("detector.endpoint is empty".into()));
        }
        Ok(())
    }
}

fn validate_unit(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}
