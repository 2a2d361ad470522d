use super::ClusterSpec;
use crate::cloud::ScwCloud;
use crate::error::Result;
use crate::tags::{cluster_tag, etcd_tag};
use crate::tasks::Volume;
use clusterflow_cloud::TaskSet;

pub const ETCD_CLUSTERS: [&str; 2] = ["main", "events"];
pub const ETCD_VOLUME_SIZE_GB: u64 = 20;

/// `<member>.etcd-<etcd cluster>.<cluster>`
pub fn etcd_volume_name(member: &str, etcd_cluster: &str, cluster: &str) -> String {
    format!("{}.etcd-{}.{}", member, etcd_cluster, cluster)
}

/// One volume per etcd cluster for every control-plane group.
pub(super) fn build(spec: &ClusterSpec, tasks: &mut TaskSet<dyn ScwCloud>) -> Result<()> {
    for group in spec.control_plane_groups() {
        for etcd_cluster in ETCD_CLUSTERS {
            tasks.add(Volume {
                tags: vec![cluster_tag(&spec.name), etcd_tag(etcd_cluster, &group.name)],
                ..Volume::new(
                    etcd_volume_name(&group.name, etcd_cluster, &spec.name),
                    group.zone_in(spec),
                    ETCD_VOLUME_SIZE_GB,
                )
            })?;
        }
    }
    Ok(())
}
