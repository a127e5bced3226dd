#![allow(clippy::multiple_crate_versions)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const APP_NAME: &str = "imagegen";

/// Overrides `api_url` when set to a non-blank value.
pub const API_URL_ENV: &str = "IMAGEGEN_API_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImgConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_style")]
    pub default_style: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Where the session slots live; next to the config file when unset.
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
}

impl Default for ImgConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            page_size: default_page_size(),
            default_style: default_style(),
            timeout_secs: default_timeout_secs(),
            session_dir: None,
        }
    }
}

fn default_api_url() -> String {
    "http://127.0.0.1:5002/api/".to_string()
}

const fn default_page_size() -> u64 {
    10
}

fn default_style() -> String {
    "realistic".to_string()
}

const fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, thiserror::Error)]
pub enum ImgConfigError {
    #[error("config error: {0}")]
    Confy(#[from] confy::ConfyError),
    #[error("invalid api_url '{url}': must start with http:// or https://")]
    InvalidApiUrl { url: String },
    #[error("page_size must be at least 1")]
    InvalidPageSize,
    #[error("config file path has no parent directory: {}", .path.display())]
    NoConfigDir { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, ImgConfigError>;

impl ImgConfig {
    /// Loads the config file from the standard OS location and applies the
    /// environment override.
    ///
    /// # Errors
    /// Returns an error if the config file cannot be read or deserialized, or
    /// holds invalid values.
    pub fn load() -> Result<Self> {
        let config: Self = confy::load(APP_NAME, None)?;
        config
            .with_api_url_override(std::env::var(API_URL_ENV).ok())
            .validated()
    }

    /// Stores the config to the standard OS location.
    ///
    /// # Errors
    /// Returns an error if the config cannot be serialized or written.
    pub fn store(&self) -> Result<()> {
        confy::store(APP_NAME, None, self)?;
        Ok(())
    }

    /// Path of the config file, whether or not it exists yet.
    ///
    /// # Errors
    /// Returns an error if the OS config location cannot be determined.
    pub fn path() -> Result<PathBuf> {
        Ok(confy::get_configuration_file_path(APP_NAME, None)?)
    }

    /// Directory holding the persisted session.
    ///
    /// # Errors
    /// Returns an error if no directory is configured and the config
    /// file location cannot be determined.
    pub fn session_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.session_dir {
            return Ok(dir.clone());
        }
        let path = Self::path()?;
        path.parent()
            .map(PathBuf::from)
            .ok_or(ImgConfigError::NoConfigDir { path })
    }

    fn with_api_url_override(mut self, value: Option<String>) -> Self {
        if let Some(url) = value.filter(|url| !url.trim().is_empty()) {
            self.api_url = url.trim().to_string();
        }
        self
    }

    fn validated(self) -> Result<Self> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ImgConfigError::InvalidApiUrl { url: self.api_url });
        }
        if self.page_size == 0 {
            return Err(ImgConfigError::InvalidPageSize);
        }
        Ok(self)
    }
}
