use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::cache::{ComponentCache, DEFAULT_COMPRESSION_LEVEL};
use crate::checksum::{SigningKey, MIN_KEY_LEN};
use crate::component::ComponentRegistry;
use crate::connection::ConnectionHandler;
use crate::error::ConfigError;
use crate::pipeline::Pipeline;

#[derive(Debug, Deserialize, Serialize)]
struct ConfigFile {
    protocol: ProtocolConfig,
}

/// The `[protocol]` table.
///
/// ```toml
/// [protocol]
/// secret = "at-least-sixteen-bytes-of-key"
/// cache_compression_level = 3
/// middleware = ["verify_checksum", "garbage_collect", "public_properties", "checksum"]
/// ```
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    /// HMAC key for payload checksums.
    pub secret: String,
    #[serde(default = "default_compression_level")]
    pub cache_compression_level: i32,
    /// Step names in registration order. The standard order when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middleware: Option<Vec<String>>,
}

fn default_compression_level() -> i32 {
    DEFAULT_COMPRESSION_LEVEL
}

impl std::fmt::Debug for ProtocolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolConfig")
            .field("secret", &"<redacted>")
            .field("cache_compression_level", &self.cache_compression_level)
            .field("middleware", &self.middleware)
            .finish()
    }
}

impl ProtocolConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            cache_compression_level: DEFAULT_COMPRESSION_LEVEL,
            middleware: None,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        tracing::debug!(path = %path.display(), "loaded protocol config");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(contents)?;
        file.protocol.validate()?;
        Ok(file.protocol)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let file = ConfigFile {
            protocol: self.clone(),
        };
        toml::to_string_pretty(&file).map_err(|e| ConfigError::Validation(e.to_string()))
    }

    /// Checks everything that does not need the pipeline built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.len() < MIN_KEY_LEN {
            return Err(ConfigError::Validation(format!(
                "secret must be at least {MIN_KEY_LEN} bytes"
            )));
        }
        if !zstd::compression_level_range().contains(&self.cache_compression_level) {
            return Err(ConfigError::Validation(format!(
                "cache_compression_level {} is out of range",
                self.cache_compression_level
            )));
        }
        Ok(())
    }

    pub fn signing_key(&self) -> Result<SigningKey, ConfigError> {
        Ok(SigningKey::new(self.secret.as_bytes().to_vec())?)
    }

    pub fn build_cache(&self) -> Arc<ComponentCache> {
        Arc::new(ComponentCache::new(self.cache_compression_level))
    }

    pub fn build_pipeline(&self, cache: Arc<ComponentCache>) -> Result<Pipeline, ConfigError> {
        let key = self.signing_key()?;
        match &self.middleware {
            Some(names) => Pipeline::from_step_names(names.as_slice(), key, cache),
            None => Ok(Pipeline::standard(key, cache)),
        }
    }

    /// Handler with a fresh cache and the configured pipeline.
    pub fn build_handler(&self, registry: ComponentRegistry) -> Result<ConnectionHandler, ConfigError> {
        self.validate()?;
        let cache = self.build_cache();
        let pipeline = self.build_pipeline(cache.clone())?;
        tracing::info!(steps = ?pipeline.step_names(), "protocol pipeline ready");
        Ok(ConnectionHandler::new(registry, pipeline, cache))
    }
}
