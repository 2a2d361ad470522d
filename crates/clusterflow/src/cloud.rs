use anyhow::Context;
use clusterflow_cloud_scaleway::{ClusterSpec, MemoryCloud, ScwApi, ScwApiConfig, ScwCloud};
use clusterflow_config::{ScwProfile, Settings};
use std::sync::Arc;

/// Live client for the cluster's zone, authenticated from the Scaleway profile.
pub fn connect(spec: &ClusterSpec, settings: &Settings) -> anyhow::Result<Arc<dyn ScwCloud>> {
    let credentials = ScwProfile::resolve().context("Failed to load Scaleway credentials")?;
    if let Some(zone) = &credentials.zone
        && zone != &spec.zone
    {
        tracing::debug!(profile_zone = %zone, cluster_zone = %spec.zone, "Using the cluster's zone");
    }

    let mut config = ScwApiConfig::new(credentials.secret_key, credentials.project_id, &spec.zone)
        .with_retry(settings.retry.clone());
    if let Some(url) = credentials.api_url {
        config = config.with_api_url(url);
    }
    let api = ScwApi::new(config)?;
    Ok(Arc::new(api))
}

/// Empty in-memory cloud, for runs that must not reach Scaleway.
pub fn offline(spec: &ClusterSpec) -> anyhow::Result<Arc<dyn ScwCloud>> {
    Ok(Arc::new(MemoryCloud::new(&spec.zone)?))
}
