use crate::{cloud, output};
use anyhow::Context;
use clusterflow_cloud::{DryRunTarget, ExecuteConfig, Executor, RunContext, StateManager, Target};
use clusterflow_cloud_scaleway::{build_cluster_tasks, terraform_target};
use clusterflow_config::{Settings, TargetKind};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Command-line overrides of the settings file
#[derive(Debug, Default)]
pub struct UpdateOptions {
    pub target: Option<TargetKind>,
    pub out: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub offline: bool,
}

impl UpdateOptions {
    fn apply(&self, mut settings: Settings) -> anyhow::Result<Settings> {
        if let Some(target) = self.target {
            settings.target = target;
        }
        if let Some(out) = &self.out {
            settings.out_dir = out.clone();
        }
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency;
        }
        settings.validate()?;

        if self.offline && settings.target == TargetKind::Direct {
            anyhow::bail!("--offline cannot be used with the direct target");
        }
        Ok(settings)
    }
}

pub async fn handle(cluster: &Path, options: UpdateOptions) -> anyhow::Result<()> {
    let spec = super::load_cluster(cluster)?;
    let settings = options.apply(Settings::load()?)?;
    println!("{} {}", "Target:".bold(), settings.target.to_string().cyan());

    let tasks = build_cluster_tasks(&spec)?;
    let (cloud, target) = match settings.target {
        TargetKind::Direct => (cloud::connect(&spec, &settings)?, Target::Live),
        // Terraform rendering never reads the cloud.
        TargetKind::Terraform => (
            cloud::offline(&spec)?,
            Target::Terraform(terraform_target(&spec.zone)),
        ),
        TargetKind::DryRun => {
            let cloud = if options.offline {
                cloud::offline(&spec)?
            } else {
                cloud::connect(&spec, &settings)?
            };
            (cloud, Target::DryRun(DryRunTarget::new()))
        }
    };

    let state = StateManager::new(&settings.state_dir);
    let lock = if matches!(target, Target::Live) {
        Some(state.acquire_lock(&spec.name).await?)
    } else {
        None
    };

    let (cancel, watcher) = super::cancel_on_ctrl_c();
    let ctx = Arc::new(
        RunContext::new(cloud, target, tasks)
            .with_cancellation(cancel)
            .with_wait(settings.wait.clone()),
    );
    let executor = Executor::new(ExecuteConfig {
        concurrency: settings.concurrency,
    });
    let report = executor.run(ctx.clone()).await;
    watcher.abort();
    let report = report?;

    output::print_report(&report);

    match ctx.target() {
        Target::Live => {
            // Identifiers are kept even for a failed run so the next one finds them.
            let mut cluster_state = state.load(&spec.name).await?;
            cluster_state.record_run(&report);
            state.save(&cluster_state).await?;
        }
        Target::Terraform(tf) if report.is_success() => {
            let path = tf
                .write_to(&settings.out_dir)
                .await
                .with_context(|| format!("Failed to write {}", settings.out_dir.display()))?;
            println!("{} {}", "Wrote".green(), path.display());
        }
        Target::Terraform(_) => {}
        Target::DryRun(dry_run) => {
            let plan = dry_run.plan();
            println!();
            print!("{}", plan);
            println!("{}", plan.summary().to_string().bold());
        }
    }

    if let Some(lock) = lock {
        lock.release().await?;
    }

    if let Some(failure) = report.first_failure {
        return Err(anyhow::Error::new(failure).context("Cluster update failed"));
    }
    if !report.is_success() {
        anyhow::bail!("Cluster update was cancelled");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_settings() {
        let options = UpdateOptions {
            target: Some(TargetKind::Terraform),
            out: Some(PathBuf::from("tf")),
            concurrency: Some(2),
            offline: false,
        };
        let settings = options.apply(Settings::default()).unwrap();
        assert_eq!(settings.target, TargetKind::Terraform);
        assert_eq!(settings.out_dir, PathBuf::from("tf"));
        assert_eq!(settings.concurrency, 2);
    }

    #[test]
    fn test_zero_concurrency_override_rejected() {
        let options = UpdateOptions {
            concurrency: Some(0),
            ..Default::default()
        };
        assert!(options.apply(Settings::default()).is_err());
    }

    #[test]
    fn test_offline_direct_rejected() {
        let options = UpdateOptions {
            offline: true,
            ..Default::default()
        };
        assert!(options.apply(Settings::default()).is_err());

        let options = UpdateOptions {
            target: Some(TargetKind::DryRun),
            offline: true,
            ..Default::default()
        };
        assert!(options.apply(Settings::default()).is_ok());
    }
}
