mod cloud;
mod commands;
mod output;

use clap::{Parser, Subcommand};
use clusterflow_config::TargetKind;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clusterflow")]
#[command(about = "Reconcile a Kubernetes cluster's cloud resources on Scaleway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the cluster's cloud resources
    Update {
        /// Cluster description (YAML)
        #[arg(short, long, env = "CLUSTERFLOW_CLUSTER")]
        cluster: PathBuf,
        /// Where changes go: direct, terraform or dry-run
        #[arg(short, long)]
        target: Option<TargetKind>,
        /// Output directory for the Terraform target
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Tasks running at once
        #[arg(long)]
        concurrency: Option<usize>,
        /// Plan against an empty in-memory cloud instead of Scaleway
        #[arg(long)]
        offline: bool,
    },
    /// Delete every resource the cluster owns
    Delete {
        /// Cluster description (YAML)
        #[arg(short, long, env = "CLUSTERFLOW_CLUSTER")]
        cluster: PathBuf,
        /// Confirm the deletion
        #[arg(short, long)]
        yes: bool,
    },
    /// Show version information
    Version,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Version => {
            println!("clusterflow {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Update {
            cluster,
            target,
            out,
            concurrency,
            offline,
        } => {
            let options = commands::update::UpdateOptions {
                target,
                out,
                concurrency,
                offline,
            };
            commands::update::handle(&cluster, options).await?;
        }
        Commands::Delete { cluster, yes } => {
            commands::delete::handle(&cluster, yes).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_args() {
        let cli = Cli::try_parse_from([
            "clusterflow",
            "update",
            "--cluster",
            "cluster.yaml",
            "--target",
            "terraform",
            "--out",
            "tf",
            "--concurrency",
            "4",
        ])
        .unwrap();

        match cli.command {
            Commands::Update {
                cluster,
                target,
                out,
                concurrency,
                offline,
            } => {
                assert_eq!(cluster, PathBuf::from("cluster.yaml"));
                assert_eq!(target, Some(TargetKind::Terraform));
                assert_eq!(out, Some(PathBuf::from("tf")));
                assert_eq!(concurrency, Some(4));
                assert!(!offline);
            }
            _ => panic!("expected update"),
        }
    }

    #[test]
    fn test_unknown_target_rejected() {
        let result = Cli::try_parse_from([
            "clusterflow",
            "update",
            "--cluster",
            "cluster.yaml",
            "--target",
            "cloudformation",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_delete_requires_cluster() {
        assert!(Cli::try_parse_from(["clusterflow", "delete", "--yes"]).is_err());
    }
}
