use super::ClusterSpec;
use crate::cloud::ScwCloud;
use crate::error::Result;
use crate::tags::cluster_tag;
use crate::tasks::{Gateway, GatewayNetwork, PrivateNetwork, owned_network_tags};
use clusterflow_cloud::{Lifecycle, TaskRef, TaskSet};

/// Private network the cluster's servers and load balancer join.
///
/// An owned network gets a public gateway for egress. A shared network is
/// only checked for existence.
pub(super) fn build(
    spec: &ClusterSpec,
    tasks: &mut TaskSet<dyn ScwCloud>,
) -> Result<TaskRef<PrivateNetwork>> {
    let Some(shared_id) = &spec.private_network_id else {
        let network = tasks.add(PrivateNetwork {
            tags: Some(owned_network_tags(&spec.name)),
            ..PrivateNetwork::new(&spec.name)
        })?;
        let gateway = tasks.add(Gateway::new(
            &spec.name,
            &spec.zone,
            vec![cluster_tag(&spec.name)],
        ))?;
        tasks.add(GatewayNetwork::new(&spec.name, gateway, network.clone()))?;
        return Ok(network);
    };

    Ok(tasks.add(PrivateNetwork {
        lifecycle: Lifecycle::ExistsAndWarnIfChanges,
        id: Some(shared_id.clone()),
        ..PrivateNetwork::new(&spec.name)
    })?)
}
