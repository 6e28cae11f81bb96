//! `strata create cluster`

use clap::Args;
use tracing::info;

use strata_cluster::{Create, CreateOptions};

use super::{build_dependencies, cancel_on_ctrl_c, ClusterArgs};
use crate::config::StrataConfig;
use crate::{Error, Result};

/// Create a cluster
#[derive(Args, Clone, Debug)]
pub struct CreateClusterArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Leave the bootstrap cluster running if creation fails
    #[arg(long)]
    pub keep_bootstrap_on_failure: bool,
}

pub async fn run(args: CreateClusterArgs) -> Result<()> {
    let config = StrataConfig::from_args(&args.cluster)?;
    let spec = config.load_spec(&config.bundles()?)?;
    let deps = build_dependencies(&spec, &config.work_dir)?;
    let mut ctx = config.task_context(spec, false, cancel_on_ctrl_c())?;

    info!(cluster = %ctx.spec.name(), "creating cluster");
    let options = CreateOptions {
        keep_bootstrap_on_failure: args.keep_bootstrap_on_failure,
    };
    Create::new(deps, options)
        .run(&mut ctx)
        .await
        .map_err(|e| Error::workflow("create", e))
}
