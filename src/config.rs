use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::chunk::MAX_CHUNK_SIZE;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    pub max_chunk_size: usize,
    /// Absolute storage URL prefix handed out by the negotiation endpoint
    pub storage_prefix: String,
    /// Local proxy prefix that replaces `storage_prefix`
    pub proxy_prefix: String,
    pub request_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: MAX_CHUNK_SIZE,
            storage_prefix: "https://storage.googleapis.com".into(),
            proxy_prefix: "http://localhost:8000/fs_proxy".into(),
            request_timeout_secs: 300,
        }
    }
}

impl UploadConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_chunk_size == 0 {
            return Err(ConfigError::Invalid("max_chunk_size must be > 0".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn location_rewrite(&self) -> LocationRewrite {
        LocationRewrite::new(&self.storage_prefix, &self.proxy_prefix)
    }
}

/// Maps storage URLs onto the local proxy path by swapping a fixed prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRewrite {
    storage_prefix: String,
    proxy_prefix: String,
}

impl LocationRewrite {
    pub fn new(storage_prefix: impl Into<String>, proxy_prefix: impl Into<String>) -> Self {
        Self {
            storage_prefix: storage_prefix.into(),
            proxy_prefix: proxy_prefix.into(),
        }
    }

    /// URLs outside the storage prefix are returned unchanged.
    pub fn apply(&self, location: &str) -> String {
        if self.storage_prefix.is_empty() {
            return location.to_string();
        }
        match location.strip_prefix(&self.storage_prefix) {
            Some(rest) => format!("{}{}", self.proxy_prefix, rest),
            None => location.to_string(),
        }
    }
}
