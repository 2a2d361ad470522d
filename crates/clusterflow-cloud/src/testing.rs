//! In-crate fixtures: a toy resource kind and the cloud it lives in

use crate::context::RunContext;
use crate::delta::{Changes, cannot_change, required};
use crate::error::{CloudError, Result};
use crate::hcl::HclBody;
use crate::target::TerraformTarget;
use crate::task::{Lifecycle, Resource, TaskKey, TaskRef};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct Store {
    widgets: BTreeMap<String, Widget>,
    finished: Vec<String>,
    parents: BTreeMap<String, Vec<String>>,
    fail_render: HashSet<String>,
    cancel_render: HashSet<String>,
    deny_find: HashSet<String>,
    mutations: usize,
    next_id: usize,
}

#[derive(Default)]
pub struct FakeCloud {
    store: Mutex<Store>,
    render_delay_ms: u64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_render_delay(mut self, ms: u64) -> Self {
        self.render_delay_ms = ms;
        self
    }

    /// Seed an existing resource without counting it as a mutation.
    pub fn insert(&self, mut widget: Widget) {
        let mut store = self.store.lock().unwrap();
        store.next_id += 1;
        widget.id = Some(format!("w-{}", store.next_id));
        store.widgets.insert(widget.name.clone(), widget);
    }

    pub fn get(&self, name: &str) -> Option<Widget> {
        self.store.lock().unwrap().widgets.get(name).cloned()
    }

    pub fn fail_render(&self, name: &str) {
        self.store.lock().unwrap().fail_render.insert(name.to_string());
    }

    /// Make the named widget's render stop as if the run were cancelled.
    pub fn cancel_render(&self, name: &str) {
        self.store.lock().unwrap().cancel_render.insert(name.to_string());
    }

    pub fn deny_find(&self, name: &str) {
        self.store.lock().unwrap().deny_find.insert(name.to_string());
    }

    pub fn finished(&self) -> Vec<String> {
        self.store.lock().unwrap().finished.clone()
    }

    pub fn started_with_parents(&self) -> BTreeMap<String, Vec<String>> {
        self.store.lock().unwrap().parents.clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.store.lock().unwrap().mutations
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Widget {
    pub name: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub id: Option<String>,
    pub size: Option<u32>,
    pub zone: Option<String>,
    #[serde(skip)]
    pub depends_on: Vec<TaskRef<Widget>>,
    #[serde(skip)]
    pub parent_ids: Vec<Option<String>>,
}

impl Widget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Normal,
            id: None,
            size: None,
            zone: None,
            depends_on: Vec::new(),
            parent_ids: Vec::new(),
        }
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn depends_on(mut self, other: &TaskRef<Widget>) -> Self {
        self.depends_on.push(other.clone());
        self
    }
}

#[async_trait]
impl Resource for Widget {
    type Cloud = FakeCloud;
    const KIND: &'static str = "Widget";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.depends_on.iter().map(TaskRef::key).collect()
    }

    async fn resolve(&mut self, ctx: &RunContext<FakeCloud>) -> Result<()> {
        let mut ids = Vec::new();
        for dep in &self.depends_on {
            ids.push(ctx.resolve(dep).await?.id);
        }
        self.parent_ids = ids;
        Ok(())
    }

    async fn find(&self, ctx: &RunContext<FakeCloud>) -> Result<Option<Self>> {
        let store = ctx.cloud().store.lock().unwrap();
        if store.deny_find.contains(&self.name) {
            return Err(CloudError::PermissionDenied(format!("read {}", self.name)));
        }
        Ok(store.widgets.get(&self.name).map(|found| {
            let mut actual = found.clone();
            actual.lifecycle = self.lifecycle;
            actual.depends_on = self.depends_on.clone();
            actual
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        cannot_change(actual, changes, &["zone"])?;
        if actual.is_none() {
            required(&self.size, "size")?;
        }
        Ok(())
    }

    async fn render_live(
        &mut self,
        ctx: &RunContext<FakeCloud>,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let parents: Vec<String> = self
            .parent_ids
            .iter()
            .map(|id| {
                id.clone()
                    .ok_or_else(|| CloudError::DependencyNotReady(self.name.clone()))
            })
            .collect::<Result<_>>()?;

        let now = cloud.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        cloud.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if cloud.render_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(cloud.render_delay_ms)).await;
        }
        cloud.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut store = cloud.store.lock().unwrap();
        store.parents.insert(self.name.clone(), parents);
        if store.cancel_render.contains(&self.name) {
            return Err(CloudError::Cancelled);
        }
        if store.fail_render.contains(&self.name) {
            return Err(CloudError::ApiError(format!(
                "injected failure for {}",
                self.name
            )));
        }
        store.mutations += 1;
        match actual {
            None => {
                store.next_id += 1;
                self.id = Some(format!("w-{}", store.next_id));
                store.widgets.insert(self.name.clone(), self.clone());
            }
            Some(_) => {
                if let (Some(size), Some(stored)) =
                    (changes.get::<u32>("size"), store.widgets.get_mut(&self.name))
                {
                    stored.size = Some(size);
                }
            }
        }
        store.finished.push(self.name.clone());
        Ok(())
    }

    fn render_terraform(
        &self,
        _ctx: &RunContext<FakeCloud>,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        target.render_resource(
            "widget",
            &self.name,
            HclBody::new()
                .attr("name", self.name.as_str())
                .attr_opt("size", self.size),
        )?;
        Ok(())
    }
}
