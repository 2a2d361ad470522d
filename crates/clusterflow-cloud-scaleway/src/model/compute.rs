use super::{ClusterSpec, GroupRole, InstanceGroupSpec};
use crate::cloud::ScwCloud;
use crate::error::Result;
use crate::tags::{cluster_tag, instance_group_tag, role_tag};
use crate::tasks::{Instance, PrivateNetwork, PrivateNic, SshKey};
use clusterflow_cloud::{Lifecycle, TaskRef, TaskSet};

/// Commercial type prefixes without local storage
const BLOCK_STORAGE_ONLY: [&str; 3] = ["PRO", "PLAY", "ENT"];
const CONTROL_PLANE_ROOT_VOLUME_GB: u64 = 20;
const NODE_ROOT_VOLUME_GB: u64 = 50;

/// Root volume for commercial types that boot from block storage, whose
/// default size is too small.
pub fn root_volume_size_gb(machine_type: &str, role: GroupRole) -> Option<u64> {
    if !BLOCK_STORAGE_ONLY.iter().any(|p| machine_type.starts_with(p)) {
        return None;
    }
    Some(match role {
        GroupRole::ControlPlane => CONTROL_PLANE_ROOT_VOLUME_GB,
        GroupRole::Node => NODE_ROOT_VOLUME_GB,
    })
}

fn instance_for(spec: &ClusterSpec, group: &InstanceGroupSpec) -> Instance {
    let role = group.role.tag_value();
    Instance {
        commercial_type: Some(group.machine_type.clone()),
        image: Some(group.image.clone()),
        tags: vec![
            cluster_tag(&spec.name),
            instance_group_tag(&group.name),
            role_tag(role),
        ],
        role: Some(role.to_string()),
        volume_size_gb: root_volume_size_gb(&group.machine_type, group.role),
        ..Instance::new(&group.name, group.zone_in(spec), group.min_size)
    }
}

/// SSH key, then an instance group and its private NICs per group.
pub(super) fn build(
    spec: &ClusterSpec,
    network: &TaskRef<PrivateNetwork>,
    tasks: &mut TaskSet<dyn ScwCloud>,
) -> Result<()> {
    if let Some(public_key) = &spec.ssh_public_key {
        tasks.add(SshKey {
            lifecycle: Lifecycle::WarnIfInsufficientAccess,
            ..SshKey::new(format!("kubernetes.{}", spec.name), public_key)
        })?;
    }

    for group in &spec.instance_groups {
        let instance = tasks.add(instance_for(spec, group))?;
        tasks.add(PrivateNic::new(
            instance,
            network.clone(),
            group.zone_in(spec),
            vec![cluster_tag(&spec.name), instance_group_tag(&group.name)],
        ))?;
    }
    Ok(())
}
