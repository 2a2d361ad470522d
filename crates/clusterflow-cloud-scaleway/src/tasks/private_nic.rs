use super::{Instance, PrivateNetwork, ScwContext, group_servers};
use crate::cloud::{CloudResource, ListFilter, ResourceKind, ResourceRef, ScwCloud, wait_for_stable};
use async_trait::async_trait;
use clusterflow_cloud::{
    Changes, CloudError, HclBody, HclValue, Lifecycle, Literal, Resource, Result, TaskKey,
    TaskRef, TerraformTarget, cannot_change, ordinal_name,
};
use serde::Serialize;
use serde_json::json;

const TF_TYPE: &str = "scaleway_instance_private_nic";

/// Private NICs joining every server of an instance group to a private
/// network. Named after the instance group.
#[derive(Debug, Clone, Serialize)]
pub struct PrivateNic {
    pub name: String,
    #[serde(skip)]
    pub lifecycle: Lifecycle,
    pub zone: Option<String>,
    pub tags: Vec<String>,
    /// Servers holding a NIC in the network; follows the instance group
    pub count: u32,

    #[serde(skip)]
    pub instance: TaskRef<Instance>,
    #[serde(skip)]
    pub private_network: TaskRef<PrivateNetwork>,

    #[serde(skip)]
    cluster: Option<String>,
    #[serde(skip)]
    private_network_id: Option<String>,
    #[serde(skip)]
    tf_private_network_id: Option<HclValue>,
}

impl PrivateNic {
    pub fn new(
        instance: TaskRef<Instance>,
        private_network: TaskRef<PrivateNetwork>,
        zone: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            name: instance.name().to_string(),
            lifecycle: Lifecycle::Normal,
            zone: Some(zone.into()),
            tags,
            count: 0,
            instance,
            private_network,
            cluster: None,
            private_network_id: None,
            tf_private_network_id: None,
        }
    }

    fn cluster(&self) -> Result<&str> {
        self.cluster.as_deref().ok_or_else(|| {
            CloudError::InvalidConfig(format!("private NICs of {} have no cluster", self.name))
        })
    }

    /// Each server of the group with its NIC in the network, if any.
    async fn nics_by_server(
        &self,
        cloud: &dyn ScwCloud,
        network_id: &str,
    ) -> Result<Vec<(CloudResource, Option<CloudResource>)>> {
        let servers = group_servers(cloud, self.cluster()?, &self.name).await?;
        let mut pairs = Vec::with_capacity(servers.len());
        for server in servers {
            let filter = ListFilter::new()
                .parent(server.require_id()?)
                .attr("private_network_id", network_id);
            let nic = cloud
                .list(ResourceKind::PrivateNic, &filter)
                .await?
                .into_iter()
                .next();
            pairs.push((server, nic));
        }
        Ok(pairs)
    }
}

#[async_trait]
impl Resource for PrivateNic {
    type Cloud = dyn ScwCloud;
    const KIND: &'static str = "PrivateNic";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        vec![self.instance.key(), self.private_network.key()]
    }

    async fn resolve(&mut self, ctx: &ScwContext) -> Result<()> {
        let instance = ctx.resolve(&self.instance).await?;
        let network = ctx.resolve(&self.private_network).await?;
        self.count = instance.count;
        self.cluster = Some(instance.cluster_name()?.to_string());
        self.private_network_id = network.id.clone();
        self.tf_private_network_id = Some(network.terraform_id());
        Ok(())
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let Some(network_id) = &self.private_network_id else {
            return Ok(None);
        };
        let nics: Vec<CloudResource> = self
            .nics_by_server(ctx.cloud(), network_id)
            .await?
            .into_iter()
            .filter_map(|(_, nic)| nic)
            .collect();
        let Some(first) = nics.first() else {
            return Ok(None);
        };

        Ok(Some(PrivateNic {
            tags: first.tags(),
            count: nics.len() as u32,
            ..self.clone()
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        cannot_change(actual, changes, &["name", "zone"])?;
        if actual.is_none() && self.zone.is_none() {
            return Err(CloudError::required("zone"));
        }
        Ok(())
    }

    async fn render_live(
        &mut self,
        ctx: &ScwContext,
        _actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<()> {
        let network_id = self.private_network_id.clone().ok_or_else(|| {
            CloudError::DependencyNotReady(self.private_network.key().to_string())
        })?;
        let cloud = ctx.cloud();

        for (server, nic) in self.nics_by_server(cloud, &network_id).await? {
            let server_id = server.require_id()?;
            match nic {
                Some(nic) if changes.contains("tags") && nic.tags() != self.tags => {
                    cloud
                        .update(
                            ResourceKind::PrivateNic,
                            &nic.reference(ResourceKind::PrivateNic)?,
                            json!({ "tags": self.tags }),
                        )
                        .await?;
                    tracing::debug!(server = %server_id, "Updated private NIC tags");
                }
                Some(_) => {}
                None => {
                    let created = cloud
                        .create(
                            ResourceKind::PrivateNic,
                            json!({
                                "server_id": server_id,
                                "private_network_id": network_id,
                                "tags": self.tags,
                            }),
                        )
                        .await?;
                    let nic_id = created.require_id()?;
                    tracing::info!(server = %server_id, nic = %nic_id, "Attached server to private network");
                    wait_for_stable(
                        cloud,
                        ResourceKind::PrivateNic,
                        &ResourceRef::nested(server_id, nic_id),
                        ctx.wait_config(),
                    )
                    .await?;
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
        for slot in 0..self.count as usize {
            let server = ordinal_name(&self.name, slot);
            target.render_resource(
                TF_TYPE,
                &server,
                HclBody::new()
                    .attr(
                        "server_id",
                        Literal::property("scaleway_instance_server", &server, "id"),
                    )
                    .attr_opt("private_network_id", self.tf_private_network_id.clone())
                    .attr("tags", self.tags.clone()),
            )?;
        }
        Ok(())
    }
}
