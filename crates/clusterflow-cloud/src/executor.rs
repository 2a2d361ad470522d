//! Topological executor
//!
//! Tasks are started as soon as their last dependency has completed
//! successfully (a Kahn frontier, not depth phases). At most `concurrency`
//! tasks hold a worker permit at once. When a task fails, everything that
//! transitively depends on it is skipped while unrelated branches continue.
//! Cancellation stops new tasks from starting; tasks already past the
//! permit run to completion.

use crate::context::RunContext;
use crate::error::{CloudError, Result};
use crate::graph::DependencyGraph;
use crate::report::{RunReport, TaskReport, TaskStatus};
use crate::task::{TaskKey, TaskOutcome};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteConfig {
    /// Maximum number of tasks running at once
    pub concurrency: usize,
}

impl Default for ExecuteConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

#[derive(Debug, Default)]
pub struct Executor {
    config: ExecuteConfig,
}

struct Entry {
    status: TaskStatus,
    message: Option<String>,
}

impl Executor {
    pub fn new(config: ExecuteConfig) -> Self {
        Self { config }
    }

    /// Run every task of the context.
    ///
    /// Returns an error only when the run cannot start (bad configuration,
    /// dependency conflicts); task failures are reported in the
    /// [`RunReport`].
    pub async fn run<C: ?Sized + Send + Sync + 'static>(
        &self,
        ctx: Arc<RunContext<C>>,
    ) -> Result<RunReport> {
        if self.config.concurrency == 0 {
            return Err(CloudError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let started = Instant::now();
        let graph = DependencyGraph::build(ctx.tasks())?;
        info!(
            tasks = graph.len(),
            concurrency = self.config.concurrency,
            target = ctx.target().name(),
            "Starting run"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut join_set: JoinSet<(TaskKey, Result<TaskOutcome>)> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, TaskKey> = HashMap::new();
        let mut results: HashMap<TaskKey, Entry> = HashMap::new();
        let mut first_failure: Option<CloudError> = None;

        let mut pending: HashMap<TaskKey, usize> = graph
            .topological_order()
            .iter()
            .map(|k| (k.clone(), graph.dependencies(k).len()))
            .collect();
        let mut ready: VecDeque<TaskKey> = graph
            .topological_order()
            .iter()
            .filter(|k| pending.get(*k) == Some(&0))
            .cloned()
            .collect();

        loop {
            while let Some(key) = ready.pop_front() {
                if ctx.is_cancelled() {
                    results.insert(key, skipped("run cancelled"));
                    continue;
                }
                let handle = join_set.spawn(run_task(
                    Arc::clone(&ctx),
                    Arc::clone(&semaphore),
                    key.clone(),
                ));
                running.insert(handle.id(), key);
            }

            let Some(joined) = join_set.join_next_with_id().await else {
                break;
            };

            let (key, result) = match joined {
                Ok((id, (key, result))) => {
                    running.remove(&id);
                    (key, result)
                }
                Err(join_error) => {
                    let Some(key) = running.remove(&join_error.id()) else {
                        error!(error = %join_error, "Lost track of a panicked task");
                        continue;
                    };
                    let message = format!("task panicked: {}", join_error);
                    let key_name = key.to_string();
                    (key, Err(CloudError::ApiError(message).for_task(key_name)))
                }
            };

            match result {
                Ok(outcome) => {
                    let entry = completed(&outcome);
                    debug!(task = %key, status = %entry.status, "Task finished");
                    results.insert(key.clone(), entry);
                    for dependent in graph.dependents(&key) {
                        if let Some(count) = pending.get_mut(&dependent) {
                            *count = count.saturating_sub(1);
                            if *count == 0 && !results.contains_key(&dependent) {
                                ready.push_back(dependent);
                            }
                        }
                    }
                }
                Err(e) if matches!(e.root_cause(), CloudError::Cancelled) => {
                    debug!(task = %key, "Task stopped by cancellation");
                    results.insert(key, skipped("run cancelled"));
                }
                Err(e) => {
                    error!(task = %key, error = %e, "Task failed");
                    for dependent in graph.transitive_dependents(&key) {
                        results
                            .entry(dependent)
                            .or_insert_with(|| skipped(&format!("dependency {} failed", key)));
                    }
                    results.insert(
                        key,
                        Entry {
                            status: TaskStatus::Failed,
                            message: Some(e.to_string()),
                        },
                    );
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
            }
        }

        let mut tasks = Vec::with_capacity(graph.len());
        for key in graph.topological_order() {
            let entry = results
                .remove(key)
                .unwrap_or_else(|| skipped("run cancelled"));
            let id = match ctx.tasks().get(key) {
                Some(task) => task.identity().await,
                None => None,
            };
            tasks.push(TaskReport {
                task: key.to_string(),
                status: entry.status,
                message: entry.message,
                id,
            });
        }

        let report = RunReport {
            tasks,
            first_failure,
            duration: started.elapsed(),
        };
        if report.is_success() {
            info!(summary = %report.summary(), "Run finished");
        } else {
            warn!(summary = %report.summary(), "Run finished with failures");
        }
        Ok(report)
    }
}

async fn run_task<C: ?Sized + Send + Sync + 'static>(
    ctx: Arc<RunContext<C>>,
    semaphore: Arc<Semaphore>,
    key: TaskKey,
) -> (TaskKey, Result<TaskOutcome>) {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return (key, Err(CloudError::Cancelled));
    };
    if ctx.is_cancelled() {
        return (key, Err(CloudError::Cancelled));
    }
    let Some(task) = ctx.tasks().get(&key).cloned() else {
        let err = CloudError::Conflict(format!("unknown task {}", key));
        return (key, Err(err));
    };

    debug!(task = %key, "Running task");
    let result = task
        .run(&ctx)
        .await
        .map_err(|e| e.for_task(key.to_string()));
    (key, result)
}

fn completed(outcome: &TaskOutcome) -> Entry {
    match outcome {
        TaskOutcome::Created => Entry {
            status: TaskStatus::Created,
            message: None,
        },
        TaskOutcome::Updated { fields } => Entry {
            status: TaskStatus::Updated,
            message: Some(fields.join(", ")),
        },
        TaskOutcome::Unchanged { note } => Entry {
            status: TaskStatus::Unchanged,
            message: note.clone(),
        },
    }
}

fn skipped(reason: &str) -> Entry {
    Entry {
        status: TaskStatus::Skipped,
        message: Some(reason.to_string()),
    }
}
