//! Persisted cluster state
//!
//! Keeps the identifiers each task ended a run with in
//! `<state_dir>/<cluster>/state.json`, so later runs and teardown can find
//! what was created.

use crate::error::{CloudError, Result};
use crate::report::RunReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_VERSION: u32 = 1;
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";
const STALE_LOCK_HOURS: i64 = 1;

/// Identifiers recorded for one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    /// State file version
    pub version: u32,

    /// Cluster name
    pub cluster: String,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Resources indexed by `kind/name`
    pub resources: BTreeMap<String, ResourceRecord>,
}

impl ClusterState {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION,
            cluster: cluster.into(),
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }

    /// Record the identifiers a run ended with.
    ///
    /// Tasks without an identifier keep whatever an earlier run recorded.
    pub fn record_run(&mut self, report: &RunReport) {
        let now = Utc::now();
        for (task, id) in report.identities() {
            let changed = self.resources.get(&task).is_none_or(|r| r.id != id);
            if changed {
                self.resources.insert(
                    task,
                    ResourceRecord {
                        id,
                        updated_at: now,
                    },
                );
            }
        }
        self.updated_at = now;
    }

    pub fn id_of(&self, task: &str) -> Option<&str> {
        self.resources.get(task).map(|r| r.id.as_str())
    }

    /// Remove a resource
    pub fn remove(&mut self, task: &str) -> Option<ResourceRecord> {
        let result = self.resources.remove(task);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Cloud identifier
    pub id: String,

    /// When the identifier was last recorded
    pub updated_at: DateTime<Utc>,
}

/// State manager for reading/writing per-cluster state files
pub struct StateManager {
    /// Root of all cluster state directories
    root: PathBuf,
}

impl StateManager {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn cluster_dir(&self, cluster: &str) -> PathBuf {
        self.root.join(cluster)
    }

    fn state_path(&self, cluster: &str) -> PathBuf {
        self.cluster_dir(cluster).join(STATE_FILE)
    }

    fn backup_path(&self, cluster: &str) -> PathBuf {
        self.cluster_dir(cluster).join(STATE_BACKUP)
    }

    fn lock_path(&self, cluster: &str) -> PathBuf {
        self.cluster_dir(cluster).join(LOCK_FILE)
    }

    async fn ensure_cluster_dir(&self, cluster: &str) -> Result<()> {
        let dir = self.cluster_dir(cluster);
        if !dir.is_dir() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!(path = %dir.display(), "Created state directory");
        }
        Ok(())
    }

    /// Load the state of a cluster, empty when nothing was recorded yet.
    pub async fn load(&self, cluster: &str) -> Result<ClusterState> {
        let path = self.state_path(cluster);
        if !path.exists() {
            tracing::debug!(cluster, "State file not found, returning empty state");
            return Ok(ClusterState::new(cluster));
        }

        let content = fs::read_to_string(&path).await?;
        let state: ClusterState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }
        if state.cluster != cluster {
            return Err(CloudError::StateError(format!(
                "State file {} belongs to cluster {}",
                path.display(),
                state.cluster
            )));
        }

        tracing::debug!(cluster, resources = state.resources.len(), "Loaded state");
        Ok(state)
    }

    /// Save the state, keeping the previous file as a backup.
    ///
    /// The new content is written next to the state file and renamed into
    /// place, so a crash never leaves a truncated `state.json`.
    pub async fn save(&self, state: &ClusterState) -> Result<()> {
        self.ensure_cluster_dir(&state.cluster).await?;

        let path = self.state_path(&state.cluster);
        let staged = path.with_extension("json.tmp");
        fs::write(&staged, serde_json::to_vec_pretty(state)?).await?;

        if path.exists() {
            fs::rename(&path, self.backup_path(&state.cluster)).await?;
        }
        fs::rename(&staged, &path).await?;

        tracing::debug!(
            cluster = %state.cluster,
            resources = state.resources.len(),
            "Saved state"
        );
        Ok(())
    }

    /// Delete the state of a cluster after teardown.
    pub async fn delete(&self, cluster: &str) -> Result<()> {
        for path in [self.state_path(cluster), self.backup_path(cluster)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(cluster, "Deleted state");
        Ok(())
    }

    /// Take the advisory lock on a cluster's state.
    ///
    /// The lock file is created exclusively; a lock older than an hour is
    /// taken over.
    pub async fn acquire_lock(&self, cluster: &str) -> Result<StateLock> {
        self.ensure_cluster_dir(cluster).await?;
        let lock_path = self.lock_path(cluster);

        if let Some(holder) = read_lock(&lock_path).await? {
            let age = Utc::now().signed_duration_since(holder.acquired_at);
            if age.num_hours() < STALE_LOCK_HOURS {
                return Err(CloudError::LockError(format!(
                    "State of {} is locked by {} (pid {}) since {}",
                    cluster, holder.host, holder.pid, holder.acquired_at
                )));
            }
            tracing::warn!(cluster, host = %holder.host, pid = holder.pid, "Taking over stale state lock");
            fs::remove_file(&lock_path).await?;
        }

        let holder = LockHolder::current();
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(CloudError::LockError(format!(
                    "State of {} was locked concurrently",
                    cluster
                )));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&serde_json::to_vec_pretty(&holder)?).await?;
        file.flush().await?;

        tracing::debug!(cluster, "Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

async fn read_lock(path: &Path) -> Result<Option<LockHolder>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Content of the lock file
#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    host: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        let host = ["HOSTNAME", "HOST"]
            .into_iter()
            .find_map(|var| std::env::var(var).ok())
            .unwrap_or_else(|| "unknown".into());
        Self {
            host,
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

/// Held lock on a cluster's state; dropping it removes the lock file.
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => {
                tracing::debug!(path = %self.lock_path.display(), "Released state lock");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
