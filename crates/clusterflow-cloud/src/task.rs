//! Task contract and the task set owned by a run
//!
//! A concrete resource kind implements [`Resource`]. The engine wraps every
//! resource in a [`TaskNode`], which erases its type behind [`Task`] so the
//! executor can drive heterogeneous kinds from one graph.

use crate::context::RunContext;
use crate::delta::{self, Changes};
use crate::error::{CloudError, Result};
use crate::target::TerraformTarget;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// How drift and absence are handled for a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Apply changes as computed
    #[default]
    Normal,
    /// The resource must exist; drift is logged but not applied
    ExistsAndWarnIfChanges,
    /// The resource must exist and must match
    ExistsAndValidates,
    /// A permission error while reading actual state is only a warning
    WarnIfInsufficientAccess,
}

impl Lifecycle {
    /// Whether the resource is owned elsewhere and must already exist.
    pub fn requires_existing(&self) -> bool {
        matches!(
            self,
            Lifecycle::ExistsAndWarnIfChanges | Lifecycle::ExistsAndValidates
        )
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Normal => write!(f, "normal"),
            Lifecycle::ExistsAndWarnIfChanges => write!(f, "exists-and-warn-if-changes"),
            Lifecycle::ExistsAndValidates => write!(f, "exists-and-validates"),
            Lifecycle::WarnIfInsufficientAccess => write!(f, "warn-if-insufficient-access"),
        }
    }
}

/// Identity of a task within a run: `kind/name`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskKey {
    pub kind: &'static str,
    pub name: String,
}

impl TaskKey {
    pub fn new(kind: &'static str, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn of<R: Resource>(name: impl Into<String>) -> Self {
        Self::new(R::KIND, name)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Non-owning, typed reference to another task of the same run.
///
/// Serializes as the referenced task's name, so a reference only shows up
/// in a delta when it points at a different task.
pub struct TaskRef<R> {
    name: String,
    _kind: PhantomData<fn() -> R>,
}

impl<R: Resource> TaskRef<R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _kind: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(R::KIND, self.name.clone())
    }
}

impl<R> Clone for TaskRef<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _kind: PhantomData,
        }
    }
}

impl<R> PartialEq for TaskRef<R> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<R> Eq for TaskRef<R> {}

impl<R: Resource> fmt::Debug for TaskRef<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskRef({}/{})", R::KIND, self.name)
    }
}

impl<R> Serialize for TaskRef<R> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de, R> Deserialize<'de> for TaskRef<R> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self {
            name,
            _kind: PhantomData,
        })
    }
}

/// A unit of desired infrastructure state.
///
/// The serialized form of a resource is what the delta engine diffs, so
/// fields that must never show up as a change (the lifecycle, transient
/// bookkeeping) should be `#[serde(skip)]`, and optional fields that are
/// "unspecified" should serialize as `null`.
#[async_trait]
pub trait Resource: Clone + fmt::Debug + Serialize + Send + Sync + 'static {
    /// Cloud collaborator the resource talks to
    type Cloud: ?Sized + Send + Sync + 'static;

    /// Resource kind, used as the first half of the task key
    const KIND: &'static str;

    fn name(&self) -> &str;

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Normal
    }

    /// Cloud identifier, unset until the resource exists
    fn id(&self) -> Option<&str> {
        None
    }

    fn set_id(&mut self, _id: String) {}

    /// Copy fields only the cloud knows (addresses, generated values) from
    /// the actual resource. Called after the identifier was adopted.
    fn adopt_outputs(&mut self, _actual: &Self) {}

    /// Key matching this task to an actual resource
    fn compare_key(&self) -> String {
        self.id()
            .map(str::to_string)
            .unwrap_or_else(|| self.name().to_string())
    }

    /// Tasks that must have rendered before this one starts
    fn dependencies(&self) -> Vec<TaskKey> {
        Vec::new()
    }

    /// Fill fields derived from dependencies. Runs before `find`.
    async fn resolve(&mut self, _ctx: &RunContext<Self::Cloud>) -> Result<()> {
        Ok(())
    }

    /// Read the actual state. `Ok(None)` when the resource does not exist.
    async fn find(&self, ctx: &RunContext<Self::Cloud>) -> Result<Option<Self>>;

    /// Validate a proposed delta before anything is rendered.
    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()>;

    /// Create or update the resource through the live API. `self` is the
    /// expected state; identifiers assigned by the cloud are written back
    /// into it.
    async fn render_live(
        &mut self,
        ctx: &RunContext<Self::Cloud>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<()>;

    /// Emit the resource into a Terraform document.
    fn render_terraform(
        &self,
        ctx: &RunContext<Self::Cloud>,
        target: &TerraformTarget,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<()>;
}

/// Result of running one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Created,
    Updated { fields: Vec<String> },
    Unchanged { note: Option<String> },
}

impl TaskOutcome {
    pub fn unchanged() -> Self {
        TaskOutcome::Unchanged { note: None }
    }

    pub fn unchanged_with(note: impl Into<String>) -> Self {
        TaskOutcome::Unchanged {
            note: Some(note.into()),
        }
    }
}

/// Type-erased task driven by the executor
#[async_trait]
pub trait Task<C: ?Sized + Send + Sync + 'static>: Send + Sync {
    fn key(&self) -> &TaskKey;

    fn dependencies(&self) -> &[TaskKey];

    fn as_any(&self) -> &dyn Any;

    /// Find, diff, check and render. Refuses a second run.
    async fn run(&self, ctx: &RunContext<C>) -> Result<TaskOutcome>;

    /// Cloud identifier currently held by the task
    async fn identity(&self) -> Option<String>;
}

/// Owns one resource for the duration of a run
pub struct TaskNode<R: Resource> {
    key: TaskKey,
    dependencies: Vec<TaskKey>,
    state: RwLock<R>,
    claimed: AtomicBool,
}

impl<R: Resource> TaskNode<R> {
    pub fn new(resource: R) -> Self {
        Self {
            key: TaskKey::new(R::KIND, resource.name()),
            dependencies: resource.dependencies(),
            state: RwLock::new(resource),
            claimed: AtomicBool::new(false),
        }
    }

    /// Copy of the current expected state.
    pub async fn snapshot(&self) -> R {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl<R: Resource> Task<R::Cloud> for TaskNode<R> {
    fn key(&self) -> &TaskKey {
        &self.key
    }

    fn dependencies(&self) -> &[TaskKey] {
        &self.dependencies
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn run(&self, ctx: &RunContext<R::Cloud>) -> Result<TaskOutcome> {
        if self.claimed.swap(true, Ordering::SeqCst) {
            return Err(CloudError::Conflict(format!(
                "task {} has already run",
                self.key
            )));
        }

        // Work on a copy so dependents resolving this task never wait on
        // a lock held across cloud I/O.
        let mut expected = self.snapshot().await;
        let result = delta::reconcile(ctx, &mut expected).await;
        // Keep whatever the render recorded, even on failure, so a half
        // created resource still has its identifier.
        *self.state.write().await = expected;
        result
    }

    async fn identity(&self) -> Option<String> {
        self.state.read().await.id().map(str::to_string)
    }
}

/// All tasks of a run, keyed by `kind/name`
pub struct TaskSet<C: ?Sized + Send + Sync + 'static> {
    tasks: BTreeMap<TaskKey, Arc<dyn Task<C>>>,
}

impl<C: ?Sized + Send + Sync + 'static> TaskSet<C> {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }

    /// Add a resource, returning a reference dependents can hold.
    pub fn add<R: Resource<Cloud = C>>(&mut self, resource: R) -> Result<TaskRef<R>> {
        let node = TaskNode::new(resource);
        let key = node.key.clone();
        if self.tasks.contains_key(&key) {
            return Err(CloudError::Conflict(format!("duplicate task {}", key)));
        }
        tracing::trace!(task = %key, "Added task");
        self.tasks.insert(key.clone(), Arc::new(node));
        Ok(TaskRef::new(key.name))
    }

    pub fn get(&self, key: &TaskKey) -> Option<&Arc<dyn Task<C>>> {
        self.tasks.get(key)
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &TaskKey> {
        self.tasks.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskKey, &Arc<dyn Task<C>>)> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Current expected state of a referenced task.
    pub async fn snapshot<R: Resource>(&self, reference: &TaskRef<R>) -> Result<R> {
        let key = reference.key();
        let task = self
            .tasks
            .get(&key)
            .ok_or_else(|| CloudError::Conflict(format!("unknown task {}", key)))?;
        let node = task
            .as_any()
            .downcast_ref::<TaskNode<R>>()
            .ok_or_else(|| CloudError::Conflict(format!("task {} has an unexpected type", key)))?;
        Ok(node.snapshot().await)
    }
}

impl<C: ?Sized + Send + Sync + 'static> Default for TaskSet<C> {
    fn default() -> Self {
        Self::new()
    }
}
