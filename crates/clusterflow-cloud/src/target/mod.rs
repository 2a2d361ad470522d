//! Render targets
//!
//! A run renders every task into exactly one target, chosen before the run
//! starts:
//!
//! - [`Target::Live`] issues API calls through the task's cloud
//! - [`Target::Terraform`] accumulates an HCL2 document
//! - [`Target::DryRun`] records the actions a live run would take

mod dryrun;
mod terraform;

pub use dryrun::DryRunTarget;
pub use terraform::{TerraformProvider, TerraformTarget};

use std::fmt;

pub enum Target {
    Live,
    Terraform(TerraformTarget),
    DryRun(DryRunTarget),
}

impl Target {
    pub fn name(&self) -> &'static str {
        match self {
            Target::Live => "direct",
            Target::Terraform(_) => "terraform",
            Target::DryRun(_) => "dry-run",
        }
    }

    /// Whether tasks read actual state before rendering.
    ///
    /// The Terraform target describes the full desired state for a later
    /// `terraform apply`, so existing resources are not consulted.
    pub fn checks_existing(&self) -> bool {
        !matches!(self, Target::Terraform(_))
    }

    pub fn as_terraform(&self) -> Option<&TerraformTarget> {
        match self {
            Target::Terraform(tf) => Some(tf),
            _ => None,
        }
    }

    pub fn as_dry_run(&self) -> Option<&DryRunTarget> {
        match self {
            Target::DryRun(plan) => Some(plan),
            _ => None,
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({})", self.name())
    }
}
