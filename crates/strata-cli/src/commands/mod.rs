//! CLI commands

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use strata_capi::{create_provider, CapiClient, KubeCapiClient};
use strata_cluster::{Dependencies, FluxAddonInstaller, KindBootstrapper, KubeClusterManager};
use strata_common::{ClusterSpec, FeatureFlags};

use crate::Result;

pub mod create;
pub mod delete;
pub mod upgrade;

/// Arguments shared by every cluster command
#[derive(Args, Clone, Debug)]
pub struct ClusterArgs {
    /// Cluster name; its config is read from `<name>/<name>-eks-a-cluster.yaml`
    pub cluster_name: Option<String>,

    /// Cluster config file
    #[arg(short = 'f', long = "filename")]
    pub filename: Option<PathBuf>,

    /// Management cluster kubeconfig
    #[arg(long, env = "STRATA_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig of the cluster itself
    #[arg(short = 'w', long = "w-config")]
    pub w_config: Option<PathBuf>,

    /// Versions bundle file replacing the embedded one
    #[arg(long)]
    pub bundles_override: Option<PathBuf>,

    /// Directory holding per-cluster folders
    #[arg(long, default_value = ".", env = "STRATA_WORK_DIR")]
    pub work_dir: PathBuf,
}

/// Wire the production collaborators for `spec`
pub fn build_dependencies(spec: &ClusterSpec, work_dir: &Path) -> Result<Dependencies> {
    let capi: Arc<dyn CapiClient> = Arc::new(KubeCapiClient::new());
    let features = Arc::new(FeatureFlags::new());
    let provider = create_provider(spec, capi.clone(), features.clone())?;

    Ok(Dependencies {
        provider: provider.clone(),
        bootstrapper: Arc::new(KindBootstrapper::new(work_dir)),
        cluster_manager: Arc::new(KubeClusterManager::new(provider, capi, work_dir)),
        addons: Arc::new(FluxAddonInstaller::new()),
        features,
    })
}

/// Token cancelled on Ctrl-C
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling after the current step");
            child.cancel();
        }
    });
    token
}
