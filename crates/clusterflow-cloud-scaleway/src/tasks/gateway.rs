use super::{ScwContext, single};
use crate::cloud::{ListFilter, ResourceKind, ResourceRef, ScwCloud, wait_for_stable};
use crate::tags::{cluster_name_from_tags, cluster_tag};
use async_trait::async_trait;
use clusterflow_cloud::{
    Changes, CloudError, HclBody, Lifecycle, Literal, Resource, Result, TerraformTarget,
    cannot_change,
};
use serde::Serialize;
use serde_json::json;

pub const GATEWAY_DEFAULT_TYPE: &str = "VPC-GW-S";
pub const BASTION_PORT: u16 = 1042;

const TF_TYPE: &str = "scaleway_vpc_public_gateway";
const TF_IP_TYPE: &str = "scaleway_vpc_public_gateway_ip";

/// Public gateway giving the private network egress and an SSH bastion
#[derive(Debug, Clone, Serialize)]
pub struct Gateway {
    pub name: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub id: Option<String>,
    pub zone: Option<String>,
    pub tags: Vec<String>,
    #[serde(rename = "type")]
    pub gateway_type: Option<String>,
}

impl Gateway {
    pub fn new(name: impl Into<String>, zone: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Normal,
            id: None,
            zone: Some(zone.into()),
            tags,
            gateway_type: Some(GATEWAY_DEFAULT_TYPE.to_string()),
        }
    }

    pub fn terraform_id(&self) -> Literal {
        Literal::property(TF_TYPE, &self.name, "id")
    }
}

/// The gateway API reports the type either as a name or as an object.
fn gateway_type(resource: &crate::cloud::CloudResource) -> Option<String> {
    resource.attr_string("type").or_else(|| {
        resource
            .attr::<serde_json::Value>("type")
            .and_then(|t| t.get("name").and_then(|n| n.as_str()).map(str::to_string))
    })
}

#[async_trait]
impl Resource for Gateway {
    type Cloud = dyn ScwCloud;
    const KIND: &'static str = "Gateway";

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
        let mut filter = ListFilter::new().name(&self.name);
        if let Some(cluster) = cluster_name_from_tags(&self.tags) {
            filter = filter.tag(cluster_tag(cluster));
        }
        let gateways = ctx.cloud().list(ResourceKind::Gateway, &filter).await?;
        let Some(gw) = single("gateway", &self.name, gateways)? else {
            return Ok(None);
        };

        Ok(Some(Gateway {
            name: self.name.clone(),
            lifecycle: self.lifecycle,
            id: gw.id().map(str::to_string),
            zone: gw.str_attr("zone").map(str::to_string),
            tags: gw.tags(),
            gateway_type: gateway_type(&gw),
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        cannot_change(actual, changes, &["id", "name", "zone", "type"])?;
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
        let Some(actual) = actual else {
            let created = cloud
                .create(
                    ResourceKind::Gateway,
                    json!({
                        "name": self.name,
                        "type": self.gateway_type.as_deref().unwrap_or(GATEWAY_DEFAULT_TYPE),
                        "tags": self.tags,
                        "enable_bastion": true,
                        "bastion_port": BASTION_PORT,
                    }),
                )
                .await?;
            let id = created.require_id()?.to_string();
            tracing::info!(name = %self.name, id = %id, "Creating public gateway");
            self.id = Some(id.clone());
            let ready = wait_for_stable(
                cloud,
                ResourceKind::Gateway,
                &ResourceRef::new(&id),
                ctx.wait_config(),
            )
            .await?;
            self.zone = ready.str_attr("zone").map(str::to_string).or(self.zone.take());
            return Ok(());
        };

        if let Some(tags) = changes.get::<Vec<String>>("tags") {
            let id = actual
                .id
                .as_deref()
                .ok_or_else(|| CloudError::required("id"))?;
            cloud
                .update(ResourceKind::Gateway, &ResourceRef::new(id), json!({ "tags": tags }))
                .await?;
            tracing::info!(name = %self.name, "Updated gateway tags");
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
        let ip = target.render_resource(TF_IP_TYPE, &self.name, HclBody::new())?;
        target.render_resource(
            TF_TYPE,
            &self.name,
            HclBody::new()
                .attr("name", self.name.as_str())
                .attr_opt("type", self.gateway_type.clone())
                .attr("tags", self.tags.clone())
                .attr("bastion_enabled", true)
                .attr("bastion_port", BASTION_PORT)
                .attr("ip_id", ip),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::fixtures::{Harness, document, memory_cloud, terraform};
    use clusterflow_cloud::{Target, TaskStatus};

    fn gateway(tags: Vec<String>) -> Gateway {
        Gateway::new("demo.k8s.local", "fr-par-1", tags)
    }

    #[tokio::test]
    async fn test_create_waits_for_running() {
        let cloud = memory_cloud();
        let mut harness = Harness::new();
        harness.add(gateway(vec![cluster_tag("demo.k8s.local")]));
        let (_, report) = harness.run(cloud.clone(), Target::Live).await;

        assert_eq!(report.status_of("Gateway/demo.k8s.local"), Some(TaskStatus::Created));
        let stored = cloud.resources(ResourceKind::Gateway);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].str_attr("status"), Some("running"));
        assert_eq!(stored[0].attr::<bool>("enable_bastion"), Some(true));
        assert_eq!(stored[0].attr::<u16>("bastion_port"), Some(BASTION_PORT));
    }

    #[tokio::test]
    async fn test_tag_drift_is_updated() {
        let cloud = memory_cloud();
        cloud
            .seed(
                ResourceKind::Gateway,
                json!({
                    "name": "demo.k8s.local",
                    "zone": "fr-par-1",
                    "type": {"name": "VPC-GW-S"},
                    "status": "running",
                    "tags": [cluster_tag("demo.k8s.local")],
                }),
            )
            .unwrap();

        let tags = vec![cluster_tag("demo.k8s.local"), "team=infra".to_string()];
        let mut harness = Harness::new();
        harness.add(gateway(tags.clone()));
        let (_, report) = harness.run(cloud.clone(), Target::Live).await;

        assert_eq!(report.status_of("Gateway/demo.k8s.local"), Some(TaskStatus::Updated));
        assert_eq!(cloud.resources(ResourceKind::Gateway)[0].tags(), tags);
        assert_eq!(cloud.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_type_cannot_change() {
        let cloud = memory_cloud();
        cloud
            .seed(
                ResourceKind::Gateway,
                json!({"name": "demo.k8s.local", "zone": "fr-par-1", "type": "VPC-GW-M", "tags": []}),
            )
            .unwrap();

        let mut harness = Harness::new();
        harness.add(gateway(Vec::new()));
        let (_, report) = harness.run(cloud.clone(), Target::Live).await;

        assert_eq!(report.status_of("Gateway/demo.k8s.local"), Some(TaskStatus::Failed));
        assert!(matches!(
            report.first_failure.as_ref().map(CloudError::root_cause),
            Some(CloudError::ImmutableField(f)) if f == "type"
        ));
    }

    #[tokio::test]
    async fn test_terraform_renders_gateway_and_ip() {
        let mut harness = Harness::new();
        harness.add(gateway(vec!["a".into()]));
        let (ctx, report) = harness.run(memory_cloud(), terraform()).await;
        assert!(report.is_success());

        let doc = document(&ctx);
        assert!(doc.contains("resource \"scaleway_vpc_public_gateway_ip\" \"demo-k8s-local\" {\n}"));
        assert!(doc.contains("  bastion_port    = 1042\n"));
        assert!(doc.contains("  ip_id           = scaleway_vpc_public_gateway_ip.demo-k8s-local.id\n"));
        assert!(doc.contains("  type            = \"VPC-GW-S\"\n"));
    }
}
