//! Application configuration.

use crate::archive::ARCHIVE_FILE_NAME;
use crate::batch::DEFAULT_TEMPERATURE;
use crate::credential::{default_storage_path, FileCredentialStore};
use crate::error::{PortraitVizError, Result};
use crate::image::providers::{GeminiClient, GeminiModel, DEFAULT_API_BASE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "portraitviz.json";

/// Returns the config file to use: `./portraitviz.json` when it exists,
/// otherwise `<config dir>/portraitviz/config.json`.
pub fn config_path() -> Result<PathBuf> {
    let local = std::env::current_dir()?.join(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Ok(local);
    }
    let base = dirs::config_dir().ok_or_else(|| {
        PortraitVizError::Config("could not determine the user config directory".into())
    })?;
    Ok(base.join("portraitviz").join("config.json"))
}

/// User-tunable settings, stored as JSON.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Gemini image model.
    #[serde(default)]
    pub model: GeminiModel,

    /// Sampling temperature for every generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Gemini REST base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Where the API key is stored. Defaults to the user config directory.
    #[serde(default)]
    pub credential_path: Option<PathBuf>,

    /// Where the zip archive is written.
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_output() -> PathBuf {
    PathBuf::from(ARCHIVE_FILE_NAME)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: GeminiModel::default(),
            temperature: default_temperature(),
            api_base: default_api_base(),
            credential_path: None,
            output: default_output(),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file at the given path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let buf = fs::read(path)?;
        serde_json::from_slice(&buf)
            .map_err(|e| PortraitVizError::Config(format!("{}: {e}", path.display())))
    }

    /// Loads the file from [`config_path`], or defaults when it does not exist.
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        tracing::debug!(path = %path.display(), "loading config");
        Self::load_from_file(&path)
    }

    /// Saves the configuration, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Credential store at the configured location.
    pub fn credential_store(&self) -> Result<FileCredentialStore> {
        let path = match &self.credential_path {
            Some(path) => path.clone(),
            None => default_storage_path()?,
        };
        Ok(FileCredentialStore::new(path))
    }

    /// Gemini client for the configured model and endpoint.
    pub fn gemini_client(&self) -> GeminiClient {
        GeminiClient::builder()
            .model(self.model)
            .api_base(&self.api_base)
            .build()
    }
}
