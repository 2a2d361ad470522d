use super::{PrivateNetwork, ScwContext, single};
use crate::cloud::{CloudResource, ListFilter, ResourceKind, ResourceRef, ScwCloud, wait_for_stable};
use crate::tags::{cluster_name_from_tags, cluster_tag};
use async_trait::async_trait;
use clusterflow_cloud::{
    Changes, CloudError, HclBody, HclValue, Lifecycle, Literal, Resource, Result, TaskKey,
    TaskRef, TerraformTarget, cannot_change,
};
use serde::Serialize;
use serde_json::{Value, json};

pub const LB_DEFAULT_TYPE: &str = "LB-S";

const TF_TYPE: &str = "scaleway_lb";
const TF_IP_TYPE: &str = "scaleway_lb_ip";

/// Load balancer, optionally attached to the cluster's private network
#[derive(Debug, Clone, Serialize)]
pub struct LoadBalancer {
    pub name: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub id: Option<String>,
    pub zone: Option<String>,
    pub tags: Vec<String>,
    #[serde(rename = "type")]
    pub lb_type: Option<String>,
    pub description: Option<String>,
    pub ssl_compatibility_level: Option<String>,
    /// `Some(true)` when the load balancer must be attached to
    /// `private_network`
    pub private_network_attached: Option<bool>,

    /// Fronts the Kubernetes API
    #[serde(skip)]
    pub for_api_server: bool,
    #[serde(skip)]
    pub private_network: Option<TaskRef<PrivateNetwork>>,
    #[serde(skip)]
    pub public_ips: Vec<String>,
    #[serde(skip)]
    pub private_ips: Vec<String>,

    #[serde(skip)]
    private_network_id: Option<String>,
    #[serde(skip)]
    tf_private_network_id: Option<HclValue>,
}

impl LoadBalancer {
    pub fn new(name: impl Into<String>, zone: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Normal,
            id: None,
            zone: Some(zone.into()),
            tags,
            lb_type: Some(LB_DEFAULT_TYPE.to_string()),
            description: None,
            ssl_compatibility_level: None,
            private_network_attached: None,
            for_api_server: false,
            private_network: None,
            public_ips: Vec::new(),
            private_ips: Vec::new(),
            private_network_id: None,
            tf_private_network_id: None,
        }
    }

    /// Front the Kubernetes API: its address becomes the `api_server_ips` output.
    pub fn serving_api(mut self) -> Self {
        self.for_api_server = true;
        self
    }

    pub fn with_private_network(mut self, network: TaskRef<PrivateNetwork>) -> Self {
        self.private_network = Some(network);
        self.private_network_attached = Some(true);
        self
    }

    /// Every address clients can reach the load balancer on, private first.
    pub fn addresses(&self) -> Vec<String> {
        self.private_ips
            .iter()
            .chain(self.public_ips.iter())
            .cloned()
            .collect()
    }

    /// Terraform expression of the flexible IP's address.
    pub fn terraform_ip_address(&self) -> Literal {
        Literal::property(TF_IP_TYPE, &self.name, "ip_address")
    }

    /// IPv4 addresses of the flexible IPs.
    fn public_ips_of(lb: &CloudResource) -> Vec<String> {
        lb.attr::<Vec<Value>>("ip")
            .unwrap_or_default()
            .iter()
            .filter_map(|ip| ip.get("ip_address").and_then(Value::as_str))
            .filter(|address| !address.contains(':'))
            .map(str::to_string)
            .collect()
    }

    /// IPAM addresses the load balancer holds in the private network.
    async fn private_ips_of(cloud: &dyn ScwCloud, lb_id: &str, network_id: &str) -> Result<Vec<String>> {
        let filter = ListFilter::new()
            .attr("resource_id", lb_id)
            .attr("private_network_id", network_id);
        let ips = cloud.list(ResourceKind::Ip, &filter).await?;
        Ok(ips
            .iter()
            .filter_map(|ip| ip.str_attr("address"))
            .map(|address| address.split('/').next().unwrap_or(address).to_string())
            .filter(|address| !address.contains(':'))
            .collect())
    }

    async fn attach(&self, ctx: &ScwContext, lb_id: &str) -> Result<()> {
        let network_id = self.private_network_id.as_deref().ok_or_else(|| {
            CloudError::DependencyNotReady(format!("private network of load balancer {}", self.name))
        })?;
        let cloud = ctx.cloud();
        cloud
            .create(
                ResourceKind::LbPrivateNetwork,
                json!({
                    "lb_id": lb_id,
                    "private_network_id": network_id,
                    "dhcp_config": {},
                }),
            )
            .await?;
        tracing::info!(name = %self.name, private_network = %network_id, "Attached load balancer to private network");
        wait_for_stable(
            cloud,
            ResourceKind::LbPrivateNetwork,
            &ResourceRef::nested(lb_id, network_id),
            ctx.wait_config(),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Resource for LoadBalancer {
    type Cloud = dyn ScwCloud;
    const KIND: &'static str = "LoadBalancer";

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

    fn adopt_outputs(&mut self, actual: &Self) {
        self.public_ips = actual.public_ips.clone();
        self.private_ips = actual.private_ips.clone();
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.private_network.iter().map(TaskRef::key).collect()
    }

    async fn resolve(&mut self, ctx: &ScwContext) -> Result<()> {
        if let Some(network) = &self.private_network {
            let network = ctx.resolve(network).await?;
            self.private_network_id = network.id.clone();
            self.tf_private_network_id = Some(network.terraform_id());
        }
        Ok(())
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let cloud = ctx.cloud();
        let mut filter = ListFilter::new().name(&self.name);
        if let Some(cluster) = cluster_name_from_tags(&self.tags) {
            filter = filter.tag(cluster_tag(cluster));
        }
        let found = cloud.list(ResourceKind::LoadBalancer, &filter).await?;
        let Some(lb) = single("load balancer", &self.name, found)? else {
            return Ok(None);
        };
        let id = lb.require_id()?.to_string();

        let mut attached = None;
        let mut private_ips = Vec::new();
        if let Some(network_id) = &self.private_network_id {
            let attachments = cloud
                .list(ResourceKind::LbPrivateNetwork, &ListFilter::new().parent(&id))
                .await?;
            attached = Some(
                attachments
                    .iter()
                    .any(|a| a.str_attr("private_network_id") == Some(network_id.as_str())),
            );
            private_ips = Self::private_ips_of(cloud, &id, network_id).await?;
        }

        // The offer has no in-place update: a differing type is reported
        // and left as is.
        let mut lb_type = lb.attr_string("type");
        if let (Some(expected), Some(current)) = (&self.lb_type, &lb_type)
            && expected != current
        {
            tracing::warn!(
                name = %self.name,
                current = %current,
                expected = %expected,
                "Load balancer type cannot be changed in place, keeping the current type"
            );
            lb_type = self.lb_type.clone();
        }

        Ok(Some(LoadBalancer {
            id: Some(id),
            zone: lb.str_attr("zone").map(str::to_string),
            tags: lb.tags(),
            lb_type,
            description: lb.attr_string("description"),
            ssl_compatibility_level: lb.attr_string("ssl_compatibility_level"),
            private_network_attached: attached,
            public_ips: Self::public_ips_of(&lb),
            private_ips,
            ..self.clone()
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        cannot_change(actual, changes, &["name", "id", "zone"])?;
        if actual.is_none() {
            if self.name.is_empty() {
                return Err(CloudError::required("name"));
            }
            if self.zone.is_none() {
                return Err(CloudError::required("zone"));
            }
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
            let id = actual.id.clone().ok_or_else(|| CloudError::required("id"))?;
            let settings = ["tags", "description", "ssl_compatibility_level"];
            if settings.iter().any(|f| changes.contains(f)) {
                tracing::info!(name = %self.name, "Updating load balancer");
                cloud
                    .update(
                        ResourceKind::LoadBalancer,
                        &ResourceRef::new(&id),
                        json!({
                            "name": actual.name,
                            "description": self.description.clone().unwrap_or_default(),
                            "tags": self.tags,
                            "ssl_compatibility_level": self.ssl_compatibility_level,
                        }),
                    )
                    .await?;
            }
            if changes.get::<bool>("private_network_attached") == Some(true) {
                self.attach(ctx, &id).await?;
                if let Some(network_id) = &self.private_network_id {
                    self.private_ips = Self::private_ips_of(cloud, &id, network_id).await?;
                }
            }
            return Ok(());
        }

        let created = cloud
            .create(
                ResourceKind::LoadBalancer,
                json!({
                    "name": self.name,
                    "description": self.description.clone().unwrap_or_default(),
                    "type": self.lb_type.as_deref().unwrap_or(LB_DEFAULT_TYPE),
                    "tags": self.tags,
                    "assign_flexible_ip": true,
                    "ssl_compatibility_level": self.ssl_compatibility_level,
                }),
            )
            .await?;
        let id = created.require_id()?.to_string();
        tracing::info!(name = %self.name, id = %id, "Creating load balancer");
        self.id = Some(id.clone());

        let reference = ResourceRef::new(&id);
        let mut ready =
            wait_for_stable(cloud, ResourceKind::LoadBalancer, &reference, ctx.wait_config()).await?;
        if self.private_network_attached == Some(true) {
            self.attach(ctx, &id).await?;
            ready = wait_for_stable(cloud, ResourceKind::LoadBalancer, &reference, ctx.wait_config())
                .await?;
            if let Some(network_id) = &self.private_network_id {
                self.private_ips = Self::private_ips_of(cloud, &id, network_id).await?;
            }
        }
        self.public_ips = Self::public_ips_of(&ready);
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
        let mut body = HclBody::new()
            .attr("ip_id", ip)
            .attr("name", self.name.as_str())
            .attr_opt("type", self.lb_type.clone())
            .attr_opt("description", self.description.clone())
            .attr_opt("ssl_compatibility_level", self.ssl_compatibility_level.clone())
            .attr("tags", self.tags.clone());
        if let Some(network_id) = &self.tf_private_network_id {
            body = body.block(
                "private_network",
                HclBody::new()
                    .attr("private_network_id", network_id.clone())
                    .attr("dhcp_config", true),
            );
        }
        target.render_resource(TF_TYPE, &self.name, body)?;
        if self.for_api_server {
            target.append_output("api_server_ips", self.terraform_ip_address())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Failure, Operation};
    use crate::tasks::fixtures::{Harness, document, memory_cloud, terraform};
    use clusterflow_cloud::{Target, TaskStatus};

    fn build(harness: &mut Harness) {
        let tags = vec![cluster_tag("c.k8s.local")];
        let pn = harness.add(PrivateNetwork {
            tags: Some(tags.clone()),
            ..PrivateNetwork::new("c.k8s.local")
        });
        harness.add(LoadBalancer {
            for_api_server: true,
            ..LoadBalancer::new("api.c.k8s.local", "fr-par-1", tags).with_private_network(pn)
        });
    }

    #[tokio::test]
    async fn test_create_attaches_and_collects_addresses() {
        let cloud = memory_cloud();
        let mut harness = Harness::new();
        build(&mut harness);
        let (ctx, report) = harness.run(cloud.clone(), Target::Live).await;
        assert!(report.is_success(), "{:?}", report.first_failure);

        let lb = ctx
            .tasks()
            .snapshot(&TaskRef::<LoadBalancer>::new("api.c.k8s.local"))
            .await
            .unwrap();
        assert_eq!(lb.public_ips, vec!["51.15.0.2".to_string()]);
        assert_eq!(lb.private_ips, vec!["172.16.0.3".to_string()]);
        assert_eq!(lb.addresses(), vec!["172.16.0.3".to_string(), "51.15.0.2".to_string()]);

        let attachments = cloud.resources(ResourceKind::LbPrivateNetwork);
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].str_attr("lb_id"), lb.id.as_deref());
    }

    #[tokio::test]
    async fn test_noop_run_keeps_addresses() {
        let cloud = memory_cloud();
        let mut harness = Harness::new();
        build(&mut harness);
        harness.run(cloud.clone(), Target::Live).await;
        let mutations = cloud.mutation_count();

        let mut harness = Harness::new();
        build(&mut harness);
        let (ctx, report) = harness.run(cloud.clone(), Target::Live).await;
        assert_eq!(report.status_of("LoadBalancer/api.c.k8s.local"), Some(TaskStatus::Unchanged));
        assert_eq!(cloud.mutation_count(), mutations);

        let lb = ctx
            .tasks()
            .snapshot(&TaskRef::<LoadBalancer>::new("api.c.k8s.local"))
            .await
            .unwrap();
        assert_eq!(lb.addresses().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_attachment_is_retried_next_run() {
        let cloud = memory_cloud();
        cloud.fail_times(
            ResourceKind::LbPrivateNetwork,
            Operation::Create,
            Failure::Api("quota".into()),
            1,
        );
        let mut harness = Harness::new();
        build(&mut harness);
        let (_, report) = harness.run(cloud.clone(), Target::Live).await;
        assert_eq!(report.status_of("LoadBalancer/api.c.k8s.local"), Some(TaskStatus::Failed));
        assert_eq!(cloud.resources(ResourceKind::LoadBalancer).len(), 1);

        let mut harness = Harness::new();
        build(&mut harness);
        let (_, report) = harness.run(cloud.clone(), Target::Live).await;
        assert_eq!(report.status_of("LoadBalancer/api.c.k8s.local"), Some(TaskStatus::Updated));
        assert_eq!(cloud.resources(ResourceKind::LbPrivateNetwork).len(), 1);
        assert_eq!(cloud.resources(ResourceKind::LoadBalancer).len(), 1);
    }

    #[tokio::test]
    async fn test_zone_cannot_change() {
        let cloud = memory_cloud();
        cloud
            .seed(
                ResourceKind::LoadBalancer,
                json!({"name": "api", "zone": "nl-ams-1", "type": "LB-S", "tags": []}),
            )
            .unwrap();
        let mut harness = Harness::new();
        harness.add(LoadBalancer::new("api", "fr-par-1", Vec::new()));
        let (_, report) = harness.run(cloud, Target::Live).await;
        assert!(matches!(
            report.first_failure.as_ref().map(CloudError::root_cause),
            Some(CloudError::ImmutableField(f)) if f == "zone"
        ));
    }

    #[tokio::test]
    async fn test_type_drift_is_kept_not_applied() {
        let cloud = memory_cloud();
        cloud
            .seed(
                ResourceKind::LoadBalancer,
                json!({"name": "api", "zone": "fr-par-1", "type": "LB-S", "tags": []}),
            )
            .unwrap();
        let mutations = cloud.mutation_count();

        for _ in 0..2 {
            let mut harness = Harness::new();
            harness.add(LoadBalancer {
                lb_type: Some("LB-GP-M".into()),
                ..LoadBalancer::new("api", "fr-par-1", Vec::new())
            });
            let (_, report) = harness.run(cloud.clone(), Target::Live).await;
            assert_eq!(report.status_of("LoadBalancer/api"), Some(TaskStatus::Unchanged));
        }

        assert_eq!(cloud.mutation_count(), mutations);
        let lbs = cloud.resources(ResourceKind::LoadBalancer);
        assert_eq!(lbs[0].str_attr("type"), Some("LB-S"));
    }

    #[tokio::test]
    async fn test_terraform_document() {
        let mut harness = Harness::new();
        build(&mut harness);
        let (ctx, _) = harness.run(memory_cloud(), terraform()).await;
        let doc = document(&ctx);

        assert!(doc.contains("resource \"scaleway_lb_ip\" \"api-c-k8s-local\" {\n}"));
        assert!(doc.contains("  ip_id = scaleway_lb_ip.api-c-k8s-local.id\n"));
        assert!(doc.contains(
            "  private_network {\n    dhcp_config        = true\n    private_network_id = scaleway_vpc_private_network.c-k8s-local.id\n  }\n"
        ));
        assert!(doc.contains("api_server_ips = [scaleway_lb_ip.api-c-k8s-local.ip_address]"));
    }
}
