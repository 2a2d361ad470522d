//! Cluster teardown
//!
//! Deletes what a cluster owns, dependents first: DNS records, load
//! balancers, gateway networks, gateways, servers (with their private
//! NICs), volumes, the private network and the SSH key. A resource that is
//! already gone counts as deleted, so an interrupted teardown can be rerun.

use crate::cloud::{CloudResource, ListFilter, ResourceKind, ResourceRef, ScwCloud, wait_for_deletion, wait_for_stable};
use crate::error::Result;
use crate::model::ClusterSpec;
use crate::tags::cluster_tag;
use clusterflow_cloud::{CloudError, WaitConfig};
use serde_json::json;

/// Records the cluster publishes, relative to the cluster's own label
const DNS_RECORD_PREFIXES: [&str; 3] = ["api", "api.internal", "kops-controller.internal"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deleted {
    pub kind: ResourceKind,
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Default)]
pub struct TeardownReport {
    pub deleted: Vec<Deleted>,
    /// Resources that disappeared between listing and deletion
    pub already_deleted: usize,
}

impl TeardownReport {
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.deleted.iter().filter(|d| d.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
    }
}

struct Teardown<'a> {
    cloud: &'a dyn ScwCloud,
    wait: &'a WaitConfig,
    report: TeardownReport,
}

impl Teardown<'_> {
    /// Run a deletion, treating NotFound as done.
    fn settle(&mut self, kind: ResourceKind, resource: &CloudResource, result: clusterflow_cloud::Result<()>) -> Result<bool> {
        match result {
            Ok(()) => {
                let id = resource.require_id()?.to_string();
                tracing::info!(kind = %kind, id = %id, name = ?resource.name(), "Deleted");
                self.report.deleted.push(Deleted {
                    kind,
                    id,
                    name: resource.name().map(str::to_string),
                });
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(kind = %kind, id = ?resource.id(), "Already deleted");
                self.report.already_deleted += 1;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&mut self, kind: ResourceKind, resource: &CloudResource) -> Result<bool> {
        let reference = resource.reference(kind)?;
        let result = self.cloud.delete(kind, &reference).await;
        self.settle(kind, resource, result)
    }

    async fn dns_records(&mut self, spec: &ClusterSpec) -> Result<()> {
        let Some((api_record, zone)) = spec.api_record() else {
            return Ok(());
        };
        let label = api_record.strip_prefix("api").unwrap_or_default();
        for prefix in DNS_RECORD_PREFIXES {
            let name = format!("{}{}", prefix, label);
            let filter = ListFilter::new().parent(&zone).name(&name);
            for record in self.cloud.list(ResourceKind::DnsRecord, &filter).await? {
                let id = record.require_id()?;
                let result = self
                    .cloud
                    .delete(ResourceKind::DnsRecord, &ResourceRef::nested(&zone, id))
                    .await;
                self.settle(ResourceKind::DnsRecord, &record, result)?;
            }
        }
        Ok(())
    }

    async fn load_balancers(&mut self, owned: &ListFilter) -> Result<()> {
        for lb in self.cloud.list(ResourceKind::LoadBalancer, owned).await? {
            let reference = lb.reference(ResourceKind::LoadBalancer)?;
            wait_or_gone(self.cloud, ResourceKind::LoadBalancer, &reference, self.wait).await?;
            if self.delete(ResourceKind::LoadBalancer, &lb).await? {
                wait_for_deletion(self.cloud, ResourceKind::LoadBalancer, &reference, self.wait).await?;
            }
        }
        Ok(())
    }

    /// Gateway networks first, then the gateways they belong to.
    async fn gateways(&mut self, owned: &ListFilter) -> Result<()> {
        let gateways = self.cloud.list(ResourceKind::Gateway, owned).await?;
        for gateway in &gateways {
            let filter = ListFilter::new().attr("gateway_id", gateway.require_id()?);
            for gwn in self.cloud.list(ResourceKind::GatewayNetwork, &filter).await? {
                let reference = gwn.reference(ResourceKind::GatewayNetwork)?;
                if self.delete(ResourceKind::GatewayNetwork, &gwn).await? {
                    wait_for_deletion(self.cloud, ResourceKind::GatewayNetwork, &reference, self.wait)
                        .await?;
                }
            }
        }
        for gateway in &gateways {
            let reference = gateway.reference(ResourceKind::Gateway)?;
            wait_or_gone(self.cloud, ResourceKind::Gateway, &reference, self.wait).await?;
            if self.delete(ResourceKind::Gateway, gateway).await? {
                wait_for_deletion(self.cloud, ResourceKind::Gateway, &reference, self.wait).await?;
            }
        }
        Ok(())
    }

    async fn servers(&mut self, owned: &ListFilter) -> Result<()> {
        for server in self.cloud.list(ResourceKind::Server, owned).await? {
            let id = server.require_id()?.to_string();
            let nics = ListFilter::new().parent(&id);
            for nic in self.cloud.list(ResourceKind::PrivateNic, &nics).await? {
                self.delete(ResourceKind::PrivateNic, &nic).await?;
            }

            let reference = ResourceRef::new(&id);
            let result = if server.str_attr("state") == Some("running") {
                self.cloud
                    .create(
                        ResourceKind::ServerAction,
                        json!({ "server_id": id, "action": "terminate" }),
                    )
                    .await
                    .map(|_| ())
            } else {
                self.cloud.delete(ResourceKind::Server, &reference).await
            };
            if self.settle(ResourceKind::Server, &server, result)? {
                wait_for_deletion(self.cloud, ResourceKind::Server, &reference, self.wait).await?;
            }
        }
        Ok(())
    }

    async fn delete_all(&mut self, kind: ResourceKind, filter: &ListFilter) -> Result<()> {
        for resource in self.cloud.list(kind, filter).await? {
            self.delete(kind, &resource).await?;
        }
        Ok(())
    }
}

/// Wait for a resource to leave its transient state before deleting it.
async fn wait_or_gone(
    cloud: &dyn ScwCloud,
    kind: ResourceKind,
    reference: &ResourceRef,
    wait: &WaitConfig,
) -> Result<()> {
    match wait_for_stable(cloud, kind, reference, wait).await {
        Ok(_) => Ok(()),
        Err(CloudError::NotFound(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Delete every resource of a cluster.
///
/// A private network given as `private_network_id` is shared and kept.
pub async fn delete_cluster(
    cloud: &dyn ScwCloud,
    spec: &ClusterSpec,
    wait: &WaitConfig,
) -> Result<TeardownReport> {
    let owned = ListFilter::new().tag(cluster_tag(&spec.name));
    let mut teardown = Teardown {
        cloud,
        wait,
        report: TeardownReport::default(),
    };

    tracing::info!(cluster = %spec.name, "Deleting cluster");
    teardown.dns_records(spec).await?;
    teardown.load_balancers(&owned).await?;
    teardown.gateways(&owned).await?;
    teardown.servers(&owned).await?;
    teardown.delete_all(ResourceKind::Volume, &owned).await?;
    if spec.private_network_id.is_none() {
        teardown
            .delete_all(ResourceKind::PrivateNetwork, &owned.clone().name(&spec.name))
            .await?;
    }
    teardown
        .delete_all(
            ResourceKind::SshKey,
            &ListFilter::new().name(format!("kubernetes.{}", spec.name)),
        )
        .await?;

    let report = teardown.report;
    tracing::info!(
        cluster = %spec.name,
        deleted = report.deleted.len(),
        already_deleted = report.already_deleted,
        "Cluster deleted"
    );
    Ok(report)
}
