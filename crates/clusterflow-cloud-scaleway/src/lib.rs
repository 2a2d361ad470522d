//! Scaleway provider for Clusterflow
//!
//! This crate describes a Kubernetes cluster on Scaleway as a set of
//! [`clusterflow_cloud`] tasks and provides the cloud they run against.
//!
//! # Features
//!
//! - Task kinds for private networks, public gateways, instance groups,
//!   private NICs, volumes, load balancers, DNS records and SSH keys
//! - [`ScwApi`], the HTTP client for the Scaleway API
//! - [`MemoryCloud`], an in-process cloud for tests and offline plans
//! - [`build_cluster_tasks`] to turn a [`ClusterSpec`] into a task set
//! - [`delete_cluster`] to tear a cluster down
//!
//! # Example
//!
//! ```ignore
//! use clusterflow_cloud::{ExecuteConfig, Executor, RunContext, Target};
//! use clusterflow_cloud_scaleway::{ClusterSpec, ScwApi, ScwApiConfig, build_cluster_tasks};
//! use std::sync::Arc;
//!
//! let spec = ClusterSpec::load("cluster.yaml".as_ref())?;
//! let cloud = Arc::new(ScwApi::new(ScwApiConfig::new(secret_key, project_id, &spec.zone))?);
//! let ctx = Arc::new(RunContext::new(cloud, Target::Live, build_cluster_tasks(&spec)?));
//!
//! let report = Executor::new(ExecuteConfig::default()).run(ctx).await?;
//! println!("{}", report.summary());
//! ```

pub mod api;
pub mod cloud;
pub mod error;
pub mod memory;
pub mod model;
pub mod tags;
pub mod tasks;
pub mod teardown;

pub use api::{DEFAULT_API_URL, ScwApi, ScwApiConfig};
pub use cloud::{CloudResource, ListFilter, ResourceKind, ResourceRef, ScwCloud};
pub use error::{Result, ScwError};
pub use memory::MemoryCloud;
pub use model::{ClusterSpec, GroupRole, InstanceGroupSpec, build_cluster_tasks, terraform_target};
pub use tasks::*;
pub use teardown::{TeardownReport, delete_cluster};
