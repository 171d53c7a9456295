//! Configuration loaded from environment variables.

use crate::error::ConfigError;
use std::path::PathBuf;

/// Environment variable holding the fal.ai API key.
pub const FAL_KEY_VAR: &str = "FAL_KEY";

/// Default directory for downloaded images, relative to the working directory.
pub const DEFAULT_IMAGES_DIR: &str = "images";

/// Application configuration, read once at startup and never mutated.
///
/// A missing `FAL_KEY` does not prevent startup: the server runs and every
/// tool call is answered with a configuration error until the key is set.
#[derive(Debug, Clone)]
pub struct Config {
    /// fal.ai API key, absent when `FAL_KEY` is unset or blank
    pub api_key: Option<String>,
    /// Directory where downloaded images are written
    pub images_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables and an optional .env file.
    pub fn from_env() -> Self {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_key = std::env::var(FAL_KEY_VAR)
            .ok()
            .filter(|key| !key.trim().is_empty());

        let images_dir = std::env::var("IMAGES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_IMAGES_DIR));

        Self {
            api_key,
            images_dir,
        }
    }

    /// Get the API key, or the configuration error reported to callers.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar(FAL_KEY_VAR.to_string()))
    }
}
