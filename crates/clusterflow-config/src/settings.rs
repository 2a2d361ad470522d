use crate::{ConfigError, Result, find_config_file};
use clusterflow_cloud::{DEFAULT_CONCURRENCY, RetryConfig, WaitConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where a run renders its changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    /// Call the cloud API
    #[default]
    Direct,
    /// Write a Terraform document
    Terraform,
    /// Only report what would change
    DryRun,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetKind::Direct => "direct",
            TargetKind::Terraform => "terraform",
            TargetKind::DryRun => "dry-run",
        })
    }
}

impl FromStr for TargetKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(TargetKind::Direct),
            "terraform" => Ok(TargetKind::Terraform),
            "dry-run" | "dryrun" => Ok(TargetKind::DryRun),
            other => Err(ConfigError::Invalid(format!(
                "unknown target {} (expected direct, terraform or dry-run)",
                other
            ))),
        }
    }
}

/// Run settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Tasks running at once
    pub concurrency: usize,
    pub target: TargetKind,
    /// Directory the Terraform document is written to
    pub out_dir: PathBuf,
    /// Root of the persisted cluster state
    pub state_dir: PathBuf,
    pub retry: RetryConfig,
    pub wait: WaitConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            target: TargetKind::default(),
            out_dir: PathBuf::from("out/terraform"),
            state_dir: PathBuf::from(".clusterflow"),
            retry: RetryConfig::default(),
            wait: WaitConfig::default(),
        }
    }
}

impl Settings {
    /// Settings from the discovered file, or the defaults when there is none.
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Ok(path) => Self::from_file(&path),
            Err(ConfigError::ConfigFileNotFound) => {
                tracing::debug!("No settings file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_yaml_str(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // An empty document is a valid, all-default settings file.
        let settings: Settings = if content.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: PathBuf::new(),
                source,
            })?
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.wait.timeout_secs == 0 {
            return Err(ConfigError::Invalid("wait.timeout_secs must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_yaml_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.concurrency, 10);
        assert_eq!(settings.target, TargetKind::Direct);
        assert_eq!(settings.out_dir, PathBuf::from("out/terraform"));
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.initial_delay_ms, 500);
        assert_eq!(settings.wait.timeout_secs, 600);
        assert_eq!(settings.wait.initial_delay_ms, 1000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::from_yaml_str(
            "concurrency: 4\ntarget: dry-run\nretry:\n  max_attempts: 2\nwait:\n  timeout_secs: 60\n",
        )
        .unwrap();
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.target, TargetKind::DryRun);
        assert_eq!(settings.retry.max_attempts, 2);
        assert_eq!(settings.retry.max_delay_ms, 10_000);
        assert_eq!(settings.wait.timeout_secs, 60);
        assert_eq!(settings.wait.max_delay_ms, 10_000);
        assert_eq!(settings.state_dir, PathBuf::from(".clusterflow"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(matches!(
            Settings::from_yaml_str("concurrency: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"concurrency: [1, 2]\n").unwrap();

        let err = Settings::from_file(file.path()).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, file.path()),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_target_kind_from_str() {
        assert_eq!("terraform".parse::<TargetKind>().unwrap(), TargetKind::Terraform);
        assert_eq!("dry-run".parse::<TargetKind>().unwrap(), TargetKind::DryRun);
        assert_eq!(TargetKind::DryRun.to_string(), "dry-run");
        assert!("cloudformation".parse::<TargetKind>().is_err());
    }
}
