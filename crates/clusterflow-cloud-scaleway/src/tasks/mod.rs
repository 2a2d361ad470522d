//! Scaleway task kinds
//!
//! Each kind implements [`clusterflow_cloud::Resource`] against
//! `dyn ScwCloud`. Fields that only exist to wire tasks together
//! (references, resolved identifiers, Terraform expressions) are skipped
//! from serialization so they never show up as changes.

mod dns_record;
mod gateway;
mod gateway_network;
mod instance;
mod load_balancer;
mod private_network;
mod private_nic;
mod ssh_key;
mod volume;

pub use dns_record::{DEFAULT_TTL, DnsRecord};
pub use gateway::{BASTION_PORT, GATEWAY_DEFAULT_TYPE, Gateway};
pub use gateway_network::GatewayNetwork;
pub use instance::{Instance, group_servers};
pub use load_balancer::{LB_DEFAULT_TYPE, LoadBalancer};
pub use private_network::PrivateNetwork;
pub(crate) use private_network::owned_network_tags;
pub use private_nic::PrivateNic;
pub use ssh_key::SshKey;
pub use volume::{DEFAULT_VOLUME_TYPE, Volume};

use crate::cloud::{CloudResource, ScwCloud};
use clusterflow_cloud::{CloudError, Result, RunContext};

pub type ScwContext = RunContext<dyn ScwCloud>;

/// At most one match, as lookups by name expect.
fn single(label: &str, name: &str, mut found: Vec<CloudResource>) -> Result<Option<CloudResource>> {
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        n => Err(CloudError::Conflict(format!(
            "expected exactly 1 {} named {}, got {}",
            label, name, n
        ))),
    }
}

/// `1_000_000_000` bytes per GB, as the Instance API counts them.
const GB: u64 = 1_000_000_000;

#[cfg(test)]
pub(crate) mod fixtures {
    use super::ScwContext;
    use crate::cloud::ScwCloud;
    use crate::memory::MemoryCloud;
    use crate::model::terraform_target;
    use clusterflow_cloud::{
        ExecuteConfig, Executor, Resource, RunContext, RunReport, Target, TaskRef, TaskSet,
        WaitConfig,
    };
    use std::sync::Arc;

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

    pub fn terraform() -> Target {
        Target::Terraform(terraform_target("fr-par-1"))
    }

    /// Document a Terraform run produced.
    pub fn document(ctx: &ScwContext) -> String {
        ctx.target()
            .as_terraform()
            .map(|tf| tf.finish())
            .unwrap_or_default()
    }

    pub struct Harness {
        pub tasks: TaskSet<dyn ScwCloud>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self {
                tasks: TaskSet::new(),
            }
        }

        pub fn add<R: Resource<Cloud = dyn ScwCloud>>(&mut self, resource: R) -> TaskRef<R> {
            self.tasks.add(resource).unwrap()
        }

        pub async fn run(self, cloud: Arc<MemoryCloud>, target: Target) -> (Arc<ScwContext>, RunReport) {
            let cloud: Arc<dyn ScwCloud> = cloud;
            let ctx = Arc::new(RunContext::new(cloud, target, self.tasks).with_wait(fast_wait()));
            let report = Executor::new(ExecuteConfig::default())
                .run(ctx.clone())
                .await
                .unwrap();
            (ctx, report)
        }
    }
}
