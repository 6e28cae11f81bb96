//! `strata upgrade cluster`

use clap::Args;
use tracing::info;

use strata_cluster::Upgrade;

use super::{build_dependencies, cancel_on_ctrl_c, ClusterArgs};
use crate::config::StrataConfig;
use crate::{Error, Result};

/// Upgrade a cluster in place
#[derive(Args, Clone, Debug)]
pub struct UpgradeClusterArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,
}

pub async fn run(args: UpgradeClusterArgs) -> Result<()> {
    let config = StrataConfig::from_args(&args.cluster)?;
    let bundles = config.bundles()?;
    let spec = config.load_spec(&bundles)?;
    let deps = build_dependencies(&spec, &config.work_dir)?;
    let mut ctx = config.task_context(spec, true, cancel_on_ctrl_c())?;

    info!(cluster = %ctx.spec.name(), "upgrading cluster");
    Upgrade::new(deps, bundles)
        .run(&mut ctx)
        .await
        .map_err(|e| Error::workflow("upgrade", e))
}
