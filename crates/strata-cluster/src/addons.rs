//! GitOps add-on installation
//!
//! Clusters that reference a `GitOpsConfig` get Flux bootstrapped against the
//! configured GitHub repository once the cluster is managed from its final
//! home. Flux reads its credentials (`GITHUB_TOKEN`) from the environment.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use strata_common::crd::GitOpsConfig;
use strata_common::process::run_command;
use strata_common::retry::{retry_fixed, RetryPolicy};
use strata_common::{Cluster, ClusterSpec, Error, Result};

const FLUX_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(600);

/// Installs cluster add-ons after the cluster is up
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddonInstaller: Send + Sync {
    /// Bootstrap GitOps on `cluster`; a no-op when the spec has no GitOps config
    async fn install_gitops(
        &self,
        cluster: &Cluster,
        spec: &ClusterSpec,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// `AddonInstaller` driving the flux CLI
#[derive(Clone, Debug, Default)]
pub struct FluxAddonInstaller;

impl FluxAddonInstaller {
    /// Create an installer
    pub fn new() -> Self {
        Self
    }
}

fn flux_bootstrap_args(config: &GitOpsConfig, cluster_name: &str, kubeconfig: &Path) -> Vec<String> {
    let mut args = vec![
        "bootstrap".to_string(),
        "github".to_string(),
        "--owner".to_string(),
        config.spec.owner.clone(),
        "--repository".to_string(),
        config.spec.repository.clone(),
        "--branch".to_string(),
        config.spec.branch.clone(),
        "--path".to_string(),
        config.cluster_config_path(cluster_name),
    ];
    if config.spec.personal {
        args.push("--personal".to_string());
    }
    args.push("--kubeconfig".to_string());
    args.push(kubeconfig.display().to_string());
    args
}

#[async_trait]
impl AddonInstaller for FluxAddonInstaller {
    async fn install_gitops(
        &self,
        cluster: &Cluster,
        spec: &ClusterSpec,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(config) = &spec.git_ops_config else {
            debug!(cluster = %spec.name(), "no GitOps config, skipping flux bootstrap");
            return Ok(());
        };
        let kubeconfig = cluster.kubeconfig().ok_or_else(|| {
            Error::internal_with_context("install_gitops", format!("no kubeconfig for {}", cluster))
        })?;
        let name = spec.name();
        let args = flux_bootstrap_args(config, name, kubeconfig);

        info!(cluster = %name, repository = %config.spec.repository, "bootstrapping flux");
        retry_fixed(&RetryPolicy::EXECUTION, "flux bootstrap", cancel, || {
            let args = args.clone();
            async move {
                let mut cmd = Command::new("flux");
                cmd.args(&args);
                run_command(
                    &mut cmd,
                    &format!("flux bootstrap (cluster={})", name),
                    FLUX_BOOTSTRAP_TIMEOUT,
                )
                .await
                .map(|_| ())
                .map_err(|e| Error::execution(name, "flux bootstrap", e))
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spec;
    use strata_common::crd::GitOpsConfigSpec;

    fn gitops(personal: bool) -> GitOpsConfig {
        GitOpsConfig::new(
            "dev-flux",
            GitOpsConfigSpec {
                owner: "acme".to_string(),
                repository: "fleet".to_string(),
                branch: "main".to_string(),
                cluster_config_path: None,
                personal,
            },
        )
    }

    #[test]
    fn bootstrap_args_target_cluster_path() {
        let args = flux_bootstrap_args(&gitops(false), "dev", Path::new("/work/dev.kubeconfig"));
        assert_eq!(
            args,
            vec![
                "bootstrap", "github", "--owner", "acme", "--repository", "fleet", "--branch",
                "main", "--path", "clusters/dev", "--kubeconfig", "/work/dev.kubeconfig",
            ]
        );
    }

    #[test]
    fn personal_accounts_add_flag() {
        let args = flux_bootstrap_args(&gitops(true), "dev", Path::new("/k"));
        assert!(args.contains(&"--personal".to_string()));
    }

    #[tokio::test]
    async fn spec_without_gitops_is_skipped() {
        let installer = FluxAddonInstaller::new();
        installer
            .install_gitops(&Cluster::new("dev", "/k"), &spec("dev"), &CancellationToken::new())
            .await
            .unwrap();
    }
}
