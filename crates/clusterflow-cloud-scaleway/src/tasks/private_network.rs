use super::{ScwContext, single};
use crate::cloud::{ListFilter, ResourceKind, ResourceRef};
use crate::tags::{cluster_name_from_tags, cluster_tag};
use async_trait::async_trait;
use clusterflow_cloud::{
    Changes, CloudError, HclBody, HclValue, Lifecycle, Literal, Resource, Result,
    TerraformTarget, cannot_change,
};
use serde::Serialize;
use serde_json::json;

const TF_TYPE: &str = "scaleway_vpc_private_network";

/// VPC private network the cluster's machines talk over
#[derive(Debug, Clone, Serialize)]
pub struct PrivateNetwork {
    pub name: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub id: Option<String>,
    pub region: Option<String>,
    /// `None` leaves the tags of a shared network alone
    pub tags: Option<Vec<String>>,
}

impl PrivateNetwork {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Normal,
            id: None,
            region: None,
            tags: None,
        }
    }

    /// Expression other resources use for this network's id in Terraform.
    ///
    /// A network the cluster does not own is never rendered, so it is
    /// referenced by its literal id.
    pub fn terraform_id(&self) -> HclValue {
        match (&self.id, self.lifecycle.requires_existing()) {
            (Some(id), true) => HclValue::from(id.as_str()),
            _ => Literal::property(TF_TYPE, &self.name, "id").into(),
        }
    }
}

#[async_trait]
impl Resource for PrivateNetwork {
    type Cloud = dyn crate::cloud::ScwCloud;
    const KIND: &'static str = "PrivateNetwork";

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
        let found = match &self.id {
            Some(id) => Some(
                cloud
                    .get(ResourceKind::PrivateNetwork, &ResourceRef::new(id))
                    .await?,
            ),
            None => {
                let mut filter = ListFilter::new().name(&self.name);
                if let Some(cluster) = self.tags.as_deref().and_then(cluster_name_from_tags) {
                    filter = filter.tag(cluster_tag(cluster));
                }
                let networks = cloud.list(ResourceKind::PrivateNetwork, &filter).await?;
                single("private network", &self.name, networks)?
            }
        };

        Ok(found.map(|pn| PrivateNetwork {
            name: self.name.clone(),
            lifecycle: self.lifecycle,
            id: pn.id().map(str::to_string),
            region: pn.str_attr("region").map(str::to_string),
            tags: Some(pn.tags()),
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        cannot_change(actual, changes, &["id", "name", "region"])?;
        if self.name.is_empty() {
            return Err(CloudError::required("name"));
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
        match actual {
            None => {
                let created = cloud
                    .create(
                        ResourceKind::PrivateNetwork,
                        json!({
                            "name": self.name,
                            "tags": self.tags.clone().unwrap_or_default(),
                        }),
                    )
                    .await?;
                tracing::info!(name = %self.name, id = ?created.id(), "Created private network");
                self.id = created.id().map(str::to_string);
                self.region = created.str_attr("region").map(str::to_string);
            }
            Some(actual) => {
                if let Some(tags) = changes.get::<Vec<String>>("tags")
                    && let Some(id) = &actual.id
                {
                    cloud
                        .update(
                            ResourceKind::PrivateNetwork,
                            &ResourceRef::new(id),
                            json!({ "tags": tags }),
                        )
                        .await?;
                    tracing::info!(name = %self.name, "Updated private network tags");
                }
            }
        }
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
                .attr_opt("tags", self.tags.clone()),
        )?;
        Ok(())
    }
}

/// Tags every network the cluster owns carries.
pub(crate) fn owned_network_tags(cluster: &str) -> Vec<String> {
    vec![cluster_tag(cluster)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::fixtures::{Harness, memory_cloud};
    use clusterflow_cloud::{Target, TaskStatus};

    fn owned(cluster: &str) -> PrivateNetwork {
        PrivateNetwork {
            tags: Some(owned_network_tags(cluster)),
            ..PrivateNetwork::new(cluster)
        }
    }

    #[tokio::test]
    async fn test_create_then_noop() {
        let cloud = memory_cloud();

        let mut first = Harness::new();
        first.add(owned("demo.k8s.local"));
        let (_, report) = first.run(cloud.clone(), Target::Live).await;
        assert_eq!(report.status_of("PrivateNetwork/demo.k8s.local"), Some(TaskStatus::Created));
        assert_eq!(report.tasks[0].id.as_deref(), Some("pn-0001"));

        let mutations = cloud.mutation_count();
        let mut second = Harness::new();
        second.add(owned("demo.k8s.local"));
        let (_, report) = second.run(cloud.clone(), Target::Live).await;
        assert_eq!(report.status_of("PrivateNetwork/demo.k8s.local"), Some(TaskStatus::Unchanged));
        assert_eq!(report.tasks[0].id.as_deref(), Some("pn-0001"));
        assert_eq!(cloud.mutation_count(), mutations);
    }

    #[tokio::test]
    async fn test_shared_network_drift_is_only_logged() {
        let cloud = memory_cloud();
        let shared = cloud
            .seed(
                ResourceKind::PrivateNetwork,
                json!({"name": "shared", "region": "fr-par", "tags": ["team=infra"]}),
            )
            .unwrap();

        let mut harness = Harness::new();
        harness.add(PrivateNetwork {
            lifecycle: Lifecycle::ExistsAndWarnIfChanges,
            id: shared.id().map(str::to_string),
            region: Some("nl-ams".into()),
            ..PrivateNetwork::new("shared")
        });
        let (_, report) = harness.run(cloud.clone(), Target::Live).await;
        assert_eq!(report.status_of("PrivateNetwork/shared"), Some(TaskStatus::Unchanged));
        assert_eq!(cloud.mutation_count(), 0);
    }

    #[test]
    fn test_terraform_id_of_shared_network_is_literal() {
        let shared = PrivateNetwork {
            lifecycle: Lifecycle::ExistsAndWarnIfChanges,
            id: Some("pn-shared".into()),
            ..PrivateNetwork::new("shared")
        };
        assert_eq!(shared.terraform_id(), HclValue::from("pn-shared"));
        assert_eq!(
            owned("demo.k8s.local").terraform_id(),
            HclValue::Literal(Literal::property(TF_TYPE, "demo.k8s.local", "id"))
        );
    }

    #[test]
    fn test_region_is_immutable() {
        let actual = owned("c");
        let changes = Changes::between(
            Some(&actual),
            &PrivateNetwork {
                region: Some("nl-ams".into()),
                ..owned("c")
            },
        )
        .unwrap();
        assert!(matches!(
            owned("c").check_changes(Some(&actual), &changes),
            Err(clusterflow_cloud::CloudError::ImmutableField(f)) if f == "region"
        ));
    }
}
