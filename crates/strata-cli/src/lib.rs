//! Strata CLI library

pub mod commands;
pub mod config;
pub mod error;

pub use config::StrataConfig;
pub use error::{Error, Result};

use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// Strata - Kubernetes cluster lifecycle management
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create resources
    #[command(subcommand)]
    Create(CreateCommand),
    /// Upgrade resources
    #[command(subcommand)]
    Upgrade(UpgradeCommand),
    /// Delete resources
    #[command(subcommand)]
    Delete(DeleteCommand),
}

#[derive(Subcommand, Debug)]
pub enum CreateCommand {
    /// Create a cluster
    Cluster(commands::create::CreateClusterArgs),
}

#[derive(Subcommand, Debug)]
pub enum UpgradeCommand {
    /// Upgrade a cluster
    Cluster(commands::upgrade::UpgradeClusterArgs),
}

#[derive(Subcommand, Debug)]
pub enum DeleteCommand {
    /// Delete a cluster
    Cluster(commands::delete::DeleteClusterArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Create(CreateCommand::Cluster(args)) => commands::create::run(args).await,
            Commands::Upgrade(UpgradeCommand::Cluster(args)) => commands::upgrade::run(args).await,
            Commands::Delete(DeleteCommand::Cluster(args)) => commands::delete::run(args).await,
        }
    }
}

/// Print a failed run's message and map the outcome to an exit status
pub fn exit_status(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn failed_run_exits_non_zero() {
        assert_eq!(exit_status(Ok(())), ExitCode::SUCCESS);
        assert_eq!(
            exit_status(Err(Error::validation("please provide either a valid <cluster-name> or -f <config-file>"))),
            ExitCode::FAILURE
        );
    }

    #[test]
    fn parses_create_with_file_and_keep_flag() {
        let cli = Cli::try_parse_from([
            "strata",
            "create",
            "cluster",
            "-f",
            "dev.yaml",
            "--keep-bootstrap-on-failure",
        ])
        .unwrap();
        match cli.command {
            Commands::Create(CreateCommand::Cluster(args)) => {
                assert_eq!(args.cluster.filename, Some(PathBuf::from("dev.yaml")));
                assert!(args.keep_bootstrap_on_failure);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_delete_by_name_with_force_cleanup() {
        let cli = Cli::try_parse_from([
            "strata",
            "delete",
            "cluster",
            "dev",
            "--force-cleanup",
            "-w",
            "dev.kubeconfig",
        ])
        .unwrap();
        match cli.command {
            Commands::Delete(DeleteCommand::Cluster(args)) => {
                assert_eq!(args.cluster.cluster_name.as_deref(), Some("dev"));
                assert_eq!(args.cluster.w_config, Some(PathBuf::from("dev.kubeconfig")));
                assert!(args.force_cleanup);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn upgrade_accepts_bundles_override() {
        let cli = Cli::try_parse_from([
            "strata",
            "upgrade",
            "cluster",
            "dev",
            "--bundles-override",
            "bundles.yaml",
            "--kubeconfig",
            "mgmt.kubeconfig",
        ])
        .unwrap();
        match cli.command {
            Commands::Upgrade(UpgradeCommand::Cluster(args)) => {
                assert_eq!(args.cluster.bundles_override, Some(PathBuf::from("bundles.yaml")));
                assert_eq!(args.cluster.kubeconfig, Some(PathBuf::from("mgmt.kubeconfig")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
