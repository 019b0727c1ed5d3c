//! Configuration loading, layering and validation.

mod resolve;
mod types;
mod validation;

pub use resolve::{
    resolve_settings, CliOverrides, EffectiveConfiguration, EffectiveSetting, SettingSource,
};
pub use types::*;

use crate::error::{ImportError, Result};
use std::path::Path;

impl ConfigFile {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Err(ImportError::Config("configuration file is empty".into()));
        }
        Ok(serde_yaml::from_str(yaml)?)
    }
}

impl ImportSettings {
    /// Validate the resolved settings; `offline` skips connection checks.
    pub fn validate(&self, offline: bool) -> Result<()> {
        validation::validate(self, offline)
    }
}

impl ConnectionSettings {
    pub fn validate(&self) -> Result<()> {
        validation::validate_connection(self)
    }
}
