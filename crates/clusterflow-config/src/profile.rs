//! Scaleway credentials
//!
//! Credentials come from the `scw` configuration file
//! (`<config_dir>/scw/config.yaml`, or `SCW_CONFIG_PATH`) and are overridden
//! field by field by the `SCW_*` environment variables. `SCW_PROFILE` selects
//! a named profile from the file's `profiles:` map; without it the top-level
//! values are used.

use crate::{ConfigError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const SCW_PROFILE_ENV: &str = "SCW_PROFILE";
pub const SCW_CONFIG_PATH_ENV: &str = "SCW_CONFIG_PATH";

const ACCESS_KEY_ENV: &str = "SCW_ACCESS_KEY";
const SECRET_KEY_ENV: &str = "SCW_SECRET_KEY";
const PROJECT_ID_ENV: &str = "SCW_DEFAULT_PROJECT_ID";
const ZONE_ENV: &str = "SCW_DEFAULT_ZONE";
const API_URL_ENV: &str = "SCW_API_URL";

/// One set of possibly incomplete Scaleway settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScwProfile {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub default_project_id: Option<String>,
    pub default_zone: Option<String>,
    pub api_url: Option<String>,
}

/// Credentials every API call needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScwCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub project_id: String,
    pub zone: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ScwConfigFile {
    #[serde(flatten)]
    active: ScwProfile,
    #[serde(default)]
    profiles: HashMap<String, ScwProfile>,
}

impl ScwProfile {
    /// Path of the `scw` configuration file
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(SCW_CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        Ok(dirs::config_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join("scw")
            .join("config.yaml"))
    }

    /// Profile from the configuration file, with the environment applied on top.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let profile_name = std::env::var(SCW_PROFILE_ENV).ok();
        let profile = Self::from_file(&path, profile_name.as_deref())?;
        Ok(profile.with_env())
    }

    /// Read `path`, selecting `profile_name` when given.
    ///
    /// A missing file yields an empty profile unless a name was asked for.
    pub fn from_file(path: &Path, profile_name: Option<&str>) -> Result<Self> {
        let file: ScwConfigFile = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            if content.trim().is_empty() {
                ScwConfigFile::default()
            } else {
                serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
        } else {
            tracing::debug!(path = %path.display(), "No scw config file");
            ScwConfigFile::default()
        };

        match profile_name {
            None => Ok(file.active),
            Some(name) => {
                let named = file.profiles.get(name).cloned().ok_or_else(|| {
                    ConfigError::ProfileNotFound {
                        name: name.to_string(),
                        path: path.to_path_buf(),
                    }
                })?;
                tracing::debug!(profile = name, "Using Scaleway profile");
                Ok(named.or(file.active))
            }
        }
    }

    /// Fill the fields this profile leaves empty from `fallback`.
    fn or(self, fallback: ScwProfile) -> Self {
        Self {
            access_key: self.access_key.or(fallback.access_key),
            secret_key: self.secret_key.or(fallback.secret_key),
            default_project_id: self.default_project_id.or(fallback.default_project_id),
            default_zone: self.default_zone.or(fallback.default_zone),
            api_url: self.api_url.or(fallback.api_url),
        }
    }

    /// Environment variables win over the file.
    pub fn with_env(self) -> Self {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            access_key: env(ACCESS_KEY_ENV),
            secret_key: env(SECRET_KEY_ENV),
            default_project_id: env(PROJECT_ID_ENV),
            default_zone: env(ZONE_ENV),
            api_url: env(API_URL_ENV),
        }
        .or(self)
    }

    /// Load and check the credentials, reporting every missing one at once.
    pub fn resolve() -> Result<ScwCredentials> {
        Self::load()?.into_credentials(std::env::var(SCW_PROFILE_ENV).ok().as_deref())
    }

    pub fn into_credentials(self, profile_name: Option<&str>) -> Result<ScwCredentials> {
        let mut missing = Vec::new();
        if self.access_key.is_none() {
            missing.push(format!("{} has to be set", ACCESS_KEY_ENV));
        }
        if self.secret_key.is_none() {
            missing.push(format!("{} has to be set", SECRET_KEY_ENV));
        }
        if self.default_project_id.is_none() {
            missing.push(format!("{} has to be set", PROJECT_ID_ENV));
        }

        match (self.access_key, self.secret_key, self.default_project_id) {
            (Some(access_key), Some(secret_key), Some(project_id)) => Ok(ScwCredentials {
                access_key,
                secret_key,
                project_id,
                zone: self.default_zone,
                api_url: self.api_url,
            }),
            _ => {
                let listed = if missing.len() == 1 {
                    missing.remove(0)
                } else {
                    format!("[{}]", missing.join(", "))
                };
                let location = match profile_name {
                    Some(name) => format!(" in profile \"{}\"", name),
                    None => " in a Scaleway profile or as an environment variable".to_string(),
                };
                Err(ConfigError::MissingCredentials(format!("{}{}", listed, location)))
            }
        }
    }
}
