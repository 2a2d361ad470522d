pub mod delete;
pub mod update;

use anyhow::Context;
use clusterflow_cloud_scaleway::ClusterSpec;
use colored::Colorize;
use std::path::Path;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) fn load_cluster(path: &Path) -> anyhow::Result<ClusterSpec> {
    let spec = ClusterSpec::load(path)
        .with_context(|| format!("Failed to load cluster description {}", path.display()))?;
    println!("{} {}", "Cluster:".bold(), spec.name.cyan());
    Ok(spec)
}

/// Token cancelled on Ctrl-C. Running tasks finish; nothing new starts.
pub(crate) fn cancel_on_ctrl_c() -> (CancellationToken, JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!(
                    "{}",
                    "Interrupted, waiting for running tasks to finish...".yellow()
                );
                cancel.cancel();
            }
        }
    });
    (cancel, watcher)
}
