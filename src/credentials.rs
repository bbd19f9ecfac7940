//! Persisted GitHub token
//!
//! The token lives in a small JSON settings file so other settings can share
//! it later. Only the `github_token` key is owned here; unknown keys are
//! preserved on write.

use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

const TOKEN_KEY: &str = "github_token";

/// Local key-value store holding the optional bearer token
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/repo-pulse/settings.json`
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir().ok_or_else(|| {
            Error::ConfigError("Could not determine the user config directory".to_string())
        })?;
        Ok(Self::open(dir.join("repo-pulse").join("settings.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored token, if any
    pub fn get(&self) -> Result<Option<String>> {
        let settings = self.load()?;
        Ok(settings
            .get(TOKEN_KEY)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string))
    }

    /// Store a token; `None` or an empty string removes it
    pub fn set(&self, token: Option<&str>) -> Result<()> {
        let mut settings = self.load()?;
        match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => {
                settings.insert(TOKEN_KEY.to_string(), Value::String(t.to_string()));
                debug!("Storing GitHub token in {}", self.path.display());
            }
            None => {
                settings.remove(TOKEN_KEY);
                debug!("Removing GitHub token from {}", self.path.display());
            }
        }
        self.save(&settings)
    }

    fn load(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| Error::FileReadError {
            path: self.path.display().to_string(),
            source: e,
        })?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        let value: Value = serde_json::from_str(&content)?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(Error::ConfigError(format!(
                "{} is not a JSON object",
                self.path.display()
            ))),
        }
    }

    fn save(&self, settings: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::FileWriteError {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let content = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, content).map_err(|e| Error::FileWriteError {
            path: self.path.display().to_string(),
            source: e,
        })?;

        Ok(())
    }
}
