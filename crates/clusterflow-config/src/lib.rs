//! Settings and credentials for Clusterflow
//!
//! - [`find_config_file`] / [`Settings::load`]: run settings (concurrency,
//!   target, output and state directories, retry and wait policies)
//! - [`ScwProfile::resolve`]: Scaleway credentials from the `scw` profile
//!   file and the environment

pub mod error;
pub mod profile;
pub mod settings;

pub use error::*;
pub use profile::{ScwCredentials, ScwProfile};
pub use settings::{Settings, TargetKind};

use std::path::PathBuf;

pub const CONFIG_ENV: &str = "CLUSTERFLOW_CONFIG";

const CANDIDATES: [&str; 3] = ["clusterflow.local.yaml", "clusterflow.yaml", ".clusterflow.yaml"];

/// `<config_dir>/clusterflow`
pub fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("clusterflow"))
}

/// Locate the settings file.
///
/// Search order:
/// 1. `CLUSTERFLOW_CONFIG` (direct path)
/// 2. current directory: clusterflow.local.yaml, clusterflow.yaml, .clusterflow.yaml
/// 3. `./.clusterflow/`, same order
/// 4. `<config_dir>/clusterflow/config.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{} points at a missing file", CONFIG_ENV);
    }

    let current_dir = std::env::current_dir()?;
    for dir in [current_dir.clone(), current_dir.join(".clusterflow")] {
        if !dir.is_dir() {
            continue;
        }
        for filename in CANDIDATES {
            let path = dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Ok(dir) = config_dir() {
        let global = dir.join("config.yaml");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}
