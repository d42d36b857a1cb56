//! Agent configuration: YAML file plus environment overrides

use chrono::FixedOffset;
use oit_gate::GateProfile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV: &str = "OIT_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("CONFIG/IO: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CONFIG/YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CONFIG/OFFSET: {0} minutes is not a valid UTC offset")]
    InvalidOffset(i32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address the local agent listens on
    pub listen_addr: String,

    /// Base URL of the sampling server (templates, sampling data, files, finalize)
    pub server_url: String,

    /// Base URL of the validation judge
    pub judge_url: String,

    /// Directory for the file-backed cache; in-memory when unset
    pub cache_dir: Option<PathBuf>,

    /// UTC offset of the sampling sites, in minutes (BRT is -180)
    pub site_offset_minutes: i32,

    pub poll_interval_ms: u64,

    pub validation_timeout_secs: u64,

    pub http_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let profile = GateProfile::field();
        Self {
            listen_addr: "127.0.0.1:8787".to_string(),
            server_url: "http://localhost:8080/api".to_string(),
            judge_url: "http://localhost:8090".to_string(),
            cache_dir: None,
            site_offset_minutes: -180,
            poll_interval_ms: profile.poll_interval_ms,
            validation_timeout_secs: profile.validation_timeout_secs,
            http_timeout_secs: 30,
        }
    }
}

impl AgentConfig {
    /// Reads `OIT_CONFIG` when set, then applies the environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.site_offset()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("OIT_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(url) = lookup("OIT_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(url) = lookup("OIT_JUDGE_URL") {
            self.judge_url = url;
        }
        if let Some(dir) = lookup("OIT_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn site_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.site_offset_minutes * 60)
            .ok_or(ConfigError::InvalidOffset(self.site_offset_minutes))
    }

    pub fn gate_profile(&self) -> GateProfile {
        GateProfile {
            name: "agent".to_string(),
            poll_interval_ms: self.poll_interval_ms,
            validation_timeout_secs: self.validation_timeout_secs,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AgentConfig::from_yaml("server_url: https://campo.example/api\nsite_offset_minutes: -240\n").unwrap();
        assert_eq!(config.server_url, "https://campo.example/api");
        assert_eq!(config.site_offset().unwrap(), FixedOffset::west_opt(4 * 3600).unwrap());
        assert_eq!(config.poll_interval_ms, 3_000);
        assert_eq!(config.cache_dir, None);
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut config = AgentConfig::default();
        config.apply_overrides(|key| match key {
            "OIT_ADDR" => Some("0.0.0.0:9000".to_string()),
            "OIT_CACHE_DIR" => Some("/var/lib/oit".to_string()),
            _ => None,
        });
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.cache_dir, Some(PathBuf::from("/var/lib/oit")));
        assert_eq!(config.judge_url, AgentConfig::default().judge_url);
    }

    #[test]
    fn test_out_of_range_offset() {
        let config = AgentConfig { site_offset_minutes: 24 * 60, ..Default::default() };
        assert!(matches!(config.site_offset(), Err(ConfigError::InvalidOffset(1440))));
    }
}
