use super::{GB, ScwContext, single};
use crate::cloud::{CloudResource, ListFilter, ResourceKind, ResourceRef, ScwCloud, wait_for_stable};
use crate::tags::{cluster_name_from_tags, cluster_tag};
use async_trait::async_trait;
use clusterflow_cloud::{
    Changes, CloudError, HclBody, Lifecycle, Resource, Result, TerraformTarget, cannot_change,
    required,
};
use serde::Serialize;
use serde_json::json;

pub const DEFAULT_VOLUME_TYPE: &str = "b_ssd";

const TF_TYPE: &str = "scaleway_instance_volume";

/// Block volume, used for etcd data on control-plane nodes
#[derive(Debug, Clone, Serialize)]
pub struct Volume {
    pub name: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub id: Option<String>,
    pub zone: Option<String>,
    pub size_gb: Option<u64>,
    pub volume_type: Option<String>,
    pub tags: Vec<String>,
}

impl Volume {
    pub fn new(name: impl Into<String>, zone: impl Into<String>, size_gb: u64) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Normal,
            id: None,
            zone: Some(zone.into()),
            size_gb: Some(size_gb),
            volume_type: Some(DEFAULT_VOLUME_TYPE.to_string()),
            tags: Vec::new(),
        }
    }

    fn from_cloud(&self, found: &CloudResource) -> Self {
        Volume {
            id: found.id().map(str::to_string),
            zone: found.str_attr("zone").map(str::to_string),
            size_gb: found.attr::<u64>("size").map(|bytes| bytes / GB),
            volume_type: found.attr_string("volume_type"),
            tags: found.tags(),
            ..self.clone()
        }
    }
}

#[async_trait]
impl Resource for Volume {
    type Cloud = dyn ScwCloud;
    const KIND: &'static str = "Volume";

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

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let cloud = ctx.cloud();
        if let Some(id) = &self.id {
            let found = cloud.get(ResourceKind::Volume, &ResourceRef::new(id)).await?;
            return Ok(Some(self.from_cloud(&found)));
        }
        let mut filter = ListFilter::new().name(&self.name);
        if let Some(cluster) = cluster_name_from_tags(&self.tags) {
            filter = filter.tag(cluster_tag(cluster));
        }
        let volumes = cloud.list(ResourceKind::Volume, &filter).await?;
        Ok(single("volume", &self.name, volumes)?.map(|v| self.from_cloud(&v)))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        cannot_change(
            actual,
            changes,
            &["name", "id", "zone", "volume_type", "size_gb"],
        )?;
        if actual.is_none() {
            if self.name.is_empty() {
                return Err(CloudError::required("name"));
            }
            required(&self.size_gb, "size_gb")?;
        }
        Ok(())
    }

    async fn render_live(
        &mut self,
        ctx: &ScwContext,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        if let Some(actual) = actual {
            if let Some(tags) = changes.get::<Vec<String>>("tags") {
                let id = actual.id.as_deref().ok_or_else(|| CloudError::required("id"))?;
                cloud
                    .update(ResourceKind::Volume, &ResourceRef::new(id), json!({ "tags": tags }))
                    .await?;
                tracing::info!(name = %self.name, "Updated volume tags");
            }
            return Ok(());
        }

        let size_gb = self.size_gb.unwrap_or_default();
        let created = cloud
            .create(
                ResourceKind::Volume,
                json!({
                    "name": self.name,
                    "size": size_gb * GB,
                    "volume_type": self.volume_type.as_deref().unwrap_or(DEFAULT_VOLUME_TYPE),
                    "tags": self.tags,
                }),
            )
            .await?;
        let id = created.require_id()?.to_string();
        tracing::info!(name = %self.name, id = %id, size_gb, "Creating volume");
        self.id = Some(id.clone());
        wait_for_stable(cloud, ResourceKind::Volume, &ResourceRef::new(id), ctx.wait_config())
            .await?;
        Ok(())
    }

    fn render_terraform(
        &self,
        _ctx: &ScwContext,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        target.render_resource(
            TF_TYPE,
            &self.name,
            HclBody::new()
                .attr("name", self.name.as_str())
                .attr_opt("size_in_gb", self.size_gb.map(|gb| gb as i64))
                .attr_opt("type", self.volume_type.clone())
                .attr("tags", self.tags.clone()),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::etcd_tag;
    use crate::tasks::fixtures::{Harness, memory_cloud};
    use clusterflow_cloud::{Target, TaskStatus};

    fn etcd_main() -> Volume {
        Volume {
            tags: vec![cluster_tag("c.k8s.local"), etcd_tag("main", "a")],
            ..Volume::new("a.etcd-main.c.k8s.local", "fr-par-1", 20)
        }
    }

    #[tokio::test]
    async fn test_create_in_bytes_then_noop() {
        let cloud = memory_cloud();
        let mut harness = Harness::new();
        harness.add(etcd_main());
        let (_, report) = harness.run(cloud.clone(), Target::Live).await;
        assert_eq!(report.status_of("Volume/a.etcd-main.c.k8s.local"), Some(TaskStatus::Created));

        let stored = cloud.resources(ResourceKind::Volume);
        assert_eq!(stored[0].attr::<u64>("size"), Some(20_000_000_000));
        assert_eq!(stored[0].str_attr("state"), Some("available"));

        let mut harness = Harness::new();
        harness.add(etcd_main());
        let (_, report) = harness.run(cloud.clone(), Target::Live).await;
        assert_eq!(report.status_of("Volume/a.etcd-main.c.k8s.local"), Some(TaskStatus::Unchanged));
        assert_eq!(cloud.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_resize_is_rejected() {
        let cloud = memory_cloud();
        let mut harness = Harness::new();
        harness.add(etcd_main());
        harness.run(cloud.clone(), Target::Live).await;

        let mut harness = Harness::new();
        harness.add(Volume {
            size_gb: Some(40),
            ..etcd_main()
        });
        let (_, report) = harness.run(cloud.clone(), Target::Live).await;
        assert!(matches!(
            report.first_failure.as_ref().map(CloudError::root_cause),
            Some(CloudError::ImmutableField(f)) if f == "size_gb"
        ));
        assert_eq!(cloud.mutation_count(), 1);
    }
}
