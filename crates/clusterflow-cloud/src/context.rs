//! Run context passed to every task operation

use crate::error::{CloudError, Result};
use crate::retry::WaitConfig;
use crate::target::Target;
use crate::task::{Resource, TaskRef, TaskSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a task may look at while it runs.
///
/// Created once per run and shared read-only between workers. The target
/// is fixed for the whole run.
pub struct RunContext<C: ?Sized + Send + Sync + 'static> {
    cloud: Arc<C>,
    target: Target,
    tasks: Arc<TaskSet<C>>,
    cancel: CancellationToken,
    wait: WaitConfig,
}

impl<C: ?Sized + Send + Sync + 'static> RunContext<C> {
    pub fn new(cloud: Arc<C>, target: Target, tasks: TaskSet<C>) -> Self {
        Self {
            cloud,
            target,
            tasks: Arc::new(tasks),
            cancel: CancellationToken::new(),
            wait: WaitConfig::default(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    pub fn cloud(&self) -> &C {
        &self.cloud
    }

    pub fn cloud_arc(&self) -> Arc<C> {
        Arc::clone(&self.cloud)
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn tasks(&self) -> &TaskSet<C> {
        &self.tasks
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn wait_config(&self) -> &WaitConfig {
        &self.wait
    }

    /// Snapshot of a dependency's expected state, including identifiers
    /// its render has written.
    pub async fn resolve<R: Resource>(&self, reference: &TaskRef<R>) -> Result<R> {
        self.tasks.snapshot(reference).await
    }

    /// Identifier of a dependency, failing when it has none yet.
    pub async fn resolve_id<R: Resource>(&self, reference: &TaskRef<R>) -> Result<String> {
        let resolved = self.resolve(reference).await?;
        resolved.id().map(str::to_string).ok_or_else(|| {
            CloudError::DependencyNotReady(format!("{} has no identifier", reference.key()))
        })
    }
}
