use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::transport::DEFAULT_BASE_URL;

/// Accounting choices applied to every expense sheet and item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpensePolicy {
    pub currency: String,
    pub has_foreign_currency: bool,
    pub bill_to_job: bool,
    pub receipt_file_type: String,
}

impl Default for ExpensePolicy {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            has_foreign_currency: true,
            bill_to_job: true,
            receipt_file_type: "image/png".to_string(),
        }
    }
}

/// Named references to job, expense type and payment type IDs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LookupTable(BTreeMap<String, String>);

impl LookupTable {
    /// Known names map to their ID, anything else is taken as an ID already.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.0.get(name).map(String::as_str).unwrap_or(name)
    }

    #[cfg(test)]
    pub fn insert(&mut self, name: &str, id: &str) {
        self.0.insert(name.to_string(), id.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemProfile {
    pub job: String,
    pub expense_type: String,
    pub payment_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bill_to_job: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub policy: ExpensePolicy,
    #[serde(default)]
    pub refs: LookupTable,
    #[serde(default)]
    pub profiles: BTreeMap<String, ItemProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: None,
            base_url: default_base_url(),
            policy: ExpensePolicy::default(),
            refs: LookupTable::default(),
            profiles: BTreeMap::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    NoHome,
    #[error("Failed to access {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("No expense profile named '{0}' in the configuration")]
    UnknownProfile(String),
}

pub fn config_path() -> Result<PathBuf, ConfigError> {
    let mut path = dirs::home_dir().ok_or(ConfigError::NoHome)?;
    path.push(".clicktime.json");
    Ok(path)
}

/// Reads the configuration at `path`. A missing file yields the defaults
/// unless `required` is set.
pub fn read_config(path: &Path, required: bool) -> Result<Config, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound && !required => {
            return Ok(Config::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_username(config: &Config) -> Option<String> {
    non_empty_env("CLICKTIME_USERNAME").or_else(|| config.username.clone())
}

pub fn read_password() -> Option<String> {
    non_empty_env("CLICKTIME_PASSWORD")
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
