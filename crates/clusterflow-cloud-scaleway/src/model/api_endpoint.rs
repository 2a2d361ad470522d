use super::ClusterSpec;
use crate::cloud::ScwCloud;
use crate::error::Result;
use crate::tags::cluster_tag;
use crate::tasks::{DnsRecord, LoadBalancer, PrivateNetwork};
use clusterflow_cloud::{TaskRef, TaskSet};

/// Load balancer in front of the API servers, and the `api` record
/// pointing at it unless the cluster uses gossip.
pub(super) fn build(
    spec: &ClusterSpec,
    network: &TaskRef<PrivateNetwork>,
    tasks: &mut TaskSet<dyn ScwCloud>,
) -> Result<()> {
    let mut lb = LoadBalancer::new(
        format!("api.{}", spec.name),
        &spec.zone,
        vec![cluster_tag(&spec.name)],
    )
    .serving_api()
    .with_private_network(network.clone());
    lb.description = Some(format!("Kubernetes API of {}", spec.name));
    let lb = tasks.add(lb)?;

    if let Some((record, zone)) = spec.api_record() {
        tasks.add(DnsRecord::new(record, zone, "A").pointing_at(lb))?;
    }
    Ok(())
}
