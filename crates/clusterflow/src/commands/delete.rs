use crate::{cloud, output};
use clusterflow_cloud::StateManager;
use clusterflow_cloud_scaleway::delete_cluster;
use clusterflow_config::Settings;
use colored::Colorize;
use std::path::Path;

pub async fn handle(cluster: &Path, yes: bool) -> anyhow::Result<()> {
    let spec = super::load_cluster(cluster)?;

    if !yes {
        println!();
        println!(
            "{}",
            "Warning: this deletes every cloud resource the cluster owns.".yellow()
        );
        println!("Pass --yes to delete");
        return Ok(());
    }

    let settings = Settings::load()?;
    let cloud = cloud::connect(&spec, &settings)?;
    let state = StateManager::new(&settings.state_dir);
    let lock = state.acquire_lock(&spec.name).await?;

    println!();
    println!("{}", "Deleting cluster resources...".yellow());
    let report = delete_cluster(cloud.as_ref(), &spec, &settings.wait).await?;
    output::print_teardown(&report);

    state.delete(&spec.name).await?;
    lock.release().await?;
    Ok(())
}
