use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

/// Engine configuration, usually read from `snugql.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub redis: RedisSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    /// Upper bound on input entities across all collections of one submission.
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
    /// Skip staging updates that leave the stored record unchanged.
    #[serde(default = "default_true")]
    pub skip_unchanged_updates: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_entities: default_max_entities(),
            skip_unchanged_updates: true,
        }
    }
}

fn default_max_entities() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_prefix(),
            namespace: default_namespace(),
        }
    }
}

fn default_redis_url() -> String {
    "${REDIS_URL}".to_string()
}

fn default_prefix() -> String {
    "snugql".to_string()
}

fn default_namespace() -> String {
    "app".to_string()
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Reads the file at `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&content)?)
    }
}

impl RedisSettings {
    /// Returns the Redis URL, expanding a `${VAR}` reference from the environment.
    pub fn resolved_url(&self) -> Result<String, StoreError> {
        if let Some(var_name) = self.url.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
            std::env::var(var_name)
                .map_err(|_| StoreError::other(format!("environment variable {var_name} not set")))
        } else {
            Ok(self.url.clone())
        }
    }
}
