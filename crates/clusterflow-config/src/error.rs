use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error(
        "Configuration file not found. Looked in:\n\
        - CLUSTERFLOW_CONFIG\n\
        - current directory: clusterflow.local.yaml, clusterflow.yaml, .clusterflow.yaml\n\
        - ./.clusterflow/\n\
        - ~/.config/clusterflow/config.yaml"
    )]
    ConfigFileNotFound,

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid settings: {0}")]
    Invalid(String),

    #[error("Could not find Scaleway profile \"{name}\" in {path}")]
    ProfileNotFound { name: String, path: PathBuf },

    #[error("{0}")]
    MissingCredentials(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
