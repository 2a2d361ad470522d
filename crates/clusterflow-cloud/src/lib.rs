//! Clusterflow reconciliation engine
//!
//! Provider-independent core that converges cloud infrastructure towards a
//! declared state. Providers describe each resource kind as a [`Resource`]
//! with `find`, `check_changes` and `render`; the engine orders them by
//! their dependencies, diffs expected against actual state and renders the
//! delta into a live cloud, a Terraform document, or a dry-run plan.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 Clusterflow CLI                  │
//! │             (clusterflow update/delete)          │
//! └─────────────────┬───────────────────────────────┘
//!                   │ TaskSet
//! ┌─────────────────▼───────────────────────────────┐
//! │               clusterflow-cloud                  │
//! │  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │ Dependency   │─▶│  Executor (Kahn frontier, │ │
//! │  │ Graph        │  │  bounded parallelism)     │ │
//! │  └──────────────┘  └────────────┬─────────────┘ │
//! │                    ┌────────────▼─────────────┐ │
//! │                    │ Delta: find/diff/check   │ │
//! │                    └────────────┬─────────────┘ │
//! │        ┌──────────┬─────────────┴──┐            │
//! │        │   Live   │   Terraform    │  Dry-run   │
//! └────────┴────┬─────┴───────┬────────┴────────────┘
//!               │             │
//!       ┌───────▼──────┐ ┌────▼──────────┐
//!       │ scaleway API │ │ kubernetes.tf │
//!       └──────────────┘ └───────────────┘
//! ```

pub mod action;
pub mod context;
pub mod delta;
pub mod error;
pub mod executor;
pub mod graph;
pub mod hcl;
pub mod report;
pub mod retry;
pub mod slots;
pub mod state;
pub mod target;
pub mod task;

#[cfg(test)]
mod testing;

// Re-exports
pub use action::{Action, ActionType, FieldChange, Plan, PlanSummary};
pub use context::RunContext;
pub use delta::{Changes, cannot_change, required, required_str};
pub use error::{CloudError, Result};
pub use executor::{DEFAULT_CONCURRENCY, ExecuteConfig, Executor};
pub use graph::DependencyGraph;
pub use hcl::{HclBody, HclValue, Literal};
pub use report::{RunReport, RunSummary, TaskReport, TaskStatus};
pub use retry::{RetryConfig, WaitConfig, retry_transient, wait_until};
pub use slots::{find_first_free_index, ordinal_name, ordinal_suffix};
pub use state::{ClusterState, ResourceRecord, StateLock, StateManager};
pub use target::{DryRunTarget, Target, TerraformProvider, TerraformTarget};
pub use task::{Lifecycle, Resource, Task, TaskKey, TaskNode, TaskOutcome, TaskRef, TaskSet};
