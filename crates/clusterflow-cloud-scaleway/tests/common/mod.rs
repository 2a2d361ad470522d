use clusterflow_cloud::{ExecuteConfig, Executor, RunContext, RunReport, Target, WaitConfig};
use clusterflow_cloud_scaleway::{
    ClusterSpec, GroupRole, InstanceGroupSpec, MemoryCloud, ScwCloud, build_cluster_tasks,
    terraform_target,
};
use std::sync::Arc;

pub const CLUSTER: &str = "demo.example.com";

pub fn fast_wait() -> WaitConfig {
    WaitConfig {
        timeout_secs: 5,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        multiplier: 1.0,
    }
}

pub fn memory_cloud() -> Arc<MemoryCloud> {
    Arc::new(MemoryCloud::new("fr-par-1").unwrap().with_settle_polls(1))
}

pub fn group(name: &str, role: GroupRole, machine_type: &str, min_size: u32) -> InstanceGroupSpec {
    InstanceGroupSpec {
        name: name.to_string(),
        role,
        machine_type: machine_type.to_string(),
        image: "ubuntu_jammy".to_string(),
        min_size,
        zone: None,
    }
}

pub fn cluster_spec() -> ClusterSpec {
    ClusterSpec {
        name: CLUSTER.to_string(),
        zone: "fr-par-1".to_string(),
        dns_zone: None,
        private_network_id: None,
        ssh_public_key: Some("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5 admin@example".to_string()),
        instance_groups: vec![
            group("control-plane-fr-par-1", GroupRole::ControlPlane, "PRO2-XXS", 1),
            group("nodes-fr-par-1", GroupRole::Node, "DEV1-M", 2),
        ],
    }
}

#[allow(dead_code)]
pub fn terraform() -> Target {
    Target::Terraform(terraform_target("fr-par-1"))
}

/// Run the cluster's tasks once against `cloud`.
pub async fn run(
    spec: &ClusterSpec,
    cloud: Arc<MemoryCloud>,
    target: Target,
) -> (Arc<RunContext<dyn ScwCloud>>, RunReport) {
    let cloud: Arc<dyn ScwCloud> = cloud;
    let tasks = build_cluster_tasks(spec).unwrap();
    let ctx = Arc::new(RunContext::new(cloud, target, tasks).with_wait(fast_wait()));
    let report = Executor::new(ExecuteConfig::default())
        .run(ctx.clone())
        .await
        .unwrap();
    (ctx, report)
}
