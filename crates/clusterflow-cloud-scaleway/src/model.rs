//! Cluster model
//!
//! A [`ClusterSpec`] describes a cluster; [`build_cluster_tasks`] turns it
//! into the task set a run reconciles:
//!
//! - the private network, with a public gateway when the cluster owns it
//! - the SSH key, instance groups and their private NICs
//! - etcd volumes for every control-plane group
//! - the API load balancer and its DNS record

mod api_endpoint;
mod cluster;
mod compute;
mod etcd;
mod network;

pub use cluster::{ClusterSpec, GOSSIP_SUFFIX, GroupRole, InstanceGroupSpec};
pub use compute::root_volume_size_gb;
pub use etcd::{ETCD_CLUSTERS, ETCD_VOLUME_SIZE_GB, etcd_volume_name};

use crate::cloud::ScwCloud;
use crate::error::Result;
use clusterflow_cloud::{TaskSet, TerraformProvider, TerraformTarget};

/// Provider constraint written to the `required_providers` block
pub const TERRAFORM_PROVIDER_VERSION: &str = ">= 2.2.1";

/// Build every task of a cluster.
pub fn build_cluster_tasks(spec: &ClusterSpec) -> Result<TaskSet<dyn ScwCloud>> {
    spec.validate()?;

    let mut tasks = TaskSet::new();
    let network = network::build(spec, &mut tasks)?;
    compute::build(spec, &network, &mut tasks)?;
    etcd::build(spec, &mut tasks)?;
    api_endpoint::build(spec, &network, &mut tasks)?;

    tracing::debug!(cluster = %spec.name, tasks = tasks.len(), "Built cluster tasks");
    Ok(tasks)
}

/// Terraform target configured for the `scaleway/scaleway` provider in `zone`.
pub fn terraform_target(zone: &str) -> TerraformTarget {
    TerraformTarget::new(
        TerraformProvider::new("scaleway", "scaleway/scaleway", TERRAFORM_PROVIDER_VERSION)
            .with_argument("zone", zone),
    )
}
