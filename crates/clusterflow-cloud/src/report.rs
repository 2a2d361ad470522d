//! Per-task results of a run

use crate::error::CloudError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Updated,
    Unchanged,
    Failed,
    Skipped,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Created => write!(f, "created"),
            TaskStatus::Updated => write!(f, "updated"),
            TaskStatus::Unchanged => write!(f, "unchanged"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    /// `kind/name`
    pub task: String,
    pub status: TaskStatus,
    pub message: Option<String>,
    /// Cloud identifier held at the end of the run
    pub id: Option<String>,
}

/// Outcome of a whole run
#[derive(Debug)]
pub struct RunReport {
    /// One entry per task, in topological order
    pub tasks: Vec<TaskReport>,
    /// First failure observed, wrapped with the failing task's identity
    pub first_failure: Option<CloudError>,
    pub duration: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| !matches!(t.status, TaskStatus::Failed | TaskStatus::Skipped))
    }

    pub fn status_of(&self, task: &str) -> Option<TaskStatus> {
        self.tasks.iter().find(|t| t.task == task).map(|t| t.status)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Identifiers by `kind/name`, for tasks that have one.
    pub fn identities(&self) -> BTreeMap<String, String> {
        self.tasks
            .iter()
            .filter_map(|t| t.id.clone().map(|id| (t.task.clone(), id)))
            .collect()
    }

    /// Whether any task created or updated something.
    pub fn has_changes(&self) -> bool {
        self.count(TaskStatus::Created) + self.count(TaskStatus::Updated) > 0
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            created: self.count(TaskStatus::Created),
            updated: self.count(TaskStatus::Updated),
            unchanged: self.count(TaskStatus::Unchanged),
            failed: self.count(TaskStatus::Failed),
            skipped: self.count(TaskStatus::Skipped),
            duration: self.duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} unchanged, {} failed, {} skipped in {:.1}s",
            self.created,
            self.updated,
            self.unchanged,
            self.failed,
            self.skipped,
            self.duration.as_secs_f64()
        )
    }
}
