//! `strata delete cluster`

use clap::Args;
use tracing::info;

use strata_cluster::{Delete, DeleteOptions};

use super::{build_dependencies, cancel_on_ctrl_c, ClusterArgs};
use crate::config::StrataConfig;
use crate::{Error, Result};

/// Delete a cluster
#[derive(Args, Clone, Debug)]
pub struct DeleteClusterArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Remove leftover bootstrap state from earlier failed runs
    #[arg(long)]
    pub force_cleanup: bool,
}

pub async fn run(args: DeleteClusterArgs) -> Result<()> {
    let config = StrataConfig::from_args(&args.cluster)?;
    let spec = config.load_spec(&config.bundles()?)?;
    let deps = build_dependencies(&spec, &config.work_dir)?;
    let mut ctx = config.task_context(spec, true, cancel_on_ctrl_c())?;

    info!(cluster = %ctx.spec.name(), force_cleanup = args.force_cleanup, "deleting cluster");
    let options = DeleteOptions {
        force_cleanup: args.force_cleanup,
    };
    Delete::new(deps, options)
        .run(&mut ctx)
        .await
        .map_err(|e| Error::workflow("delete", e))
}
