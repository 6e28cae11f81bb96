//! Delete workflow
//!
//! A self-managed cluster cannot delete its own machines, so its CAPI
//! objects are first moved into a fresh bootstrap cluster which then tears
//! the workload down. A managed cluster is deleted straight from its
//! management cluster.
//!
//! A run that fails after the move leaves the bootstrap cluster holding the
//! only copy of the objects. Running delete again finds that cluster and
//! resumes from it instead of creating (or force-cleaning) a new one.

use std::fmt;

use async_trait::async_trait;
use tracing::{info, warn};

use strata_common::{Cluster, ClusterSpec, Result};

use super::{Dependencies, StepOutcome, TaskContext, Workflow};
use crate::bootstrap::{bootstrap_cluster_name, DeleteBootstrapOptions};
use crate::validations::{self, require_management_cluster};

/// Delete-time switches
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Remove leftovers of earlier failed runs and tolerate missing state
    pub force_cleanup: bool,
}

/// Steps of the delete workflow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteStep {
    Validate,
    CleanupLeftoverBootstrap,
    CreateBootstrapCluster,
    InstallCapi,
    MoveToBootstrap,
    DeleteWorkloadCluster,
    DeleteBootstrapCluster,
    CleanupClusterResources,
}

impl fmt::Display for DeleteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeleteStep::Validate => "validate",
            DeleteStep::CleanupLeftoverBootstrap => "clean up leftover bootstrap cluster",
            DeleteStep::CreateBootstrapCluster => "create bootstrap cluster",
            DeleteStep::InstallCapi => "install CAPI on bootstrap cluster",
            DeleteStep::MoveToBootstrap => "move cluster management to bootstrap cluster",
            DeleteStep::DeleteWorkloadCluster => "delete workload cluster",
            DeleteStep::DeleteBootstrapCluster => "delete bootstrap cluster",
            DeleteStep::CleanupClusterResources => "clean up cluster resources",
        };
        f.write_str(name)
    }
}

/// Delete a cluster
pub struct Delete {
    deps: Dependencies,
    options: DeleteOptions,
}

impl Delete {
    /// Delete workflow over the given collaborators
    pub fn new(deps: Dependencies, options: DeleteOptions) -> Self {
        Self { deps, options }
    }

    /// Run to completion, compensating on failure
    pub async fn run(&self, ctx: &mut TaskContext) -> Result<()> {
        super::run(self, ctx).await
    }

    fn bootstrap_options(&self) -> DeleteBootstrapOptions {
        DeleteBootstrapOptions {
            force_cleanup: self.options.force_cleanup,
        }
    }

    /// A bootstrap cluster from an earlier run that still holds the cluster
    async fn resumable_bootstrap(&self, spec: &ClusterSpec) -> Result<Option<Cluster>> {
        let Some(bootstrap) = self.deps.bootstrapper.find_bootstrap_cluster(spec).await? else {
            return Ok(None);
        };
        let clusters = self.deps.cluster_manager.list_capi_clusters(&bootstrap).await?;
        Ok(clusters.iter().any(|c| c.name == spec.name()).then_some(bootstrap))
    }
}

/// The cluster's objects already live in the bootstrap cluster
fn managed_from_bootstrap(ctx: &TaskContext) -> bool {
    ctx.bootstrap.is_some() && ctx.management == ctx.bootstrap
}

#[async_trait]
impl Workflow for Delete {
    type Step = DeleteStep;
    const NAME: &'static str = "delete";

    fn steps(&self, ctx: &TaskContext) -> Vec<DeleteStep> {
        let self_managed = ctx.spec.cluster.is_self_managed();
        let force = self.options.force_cleanup;
        let needs_bootstrap = self_managed || force;

        let mut steps = vec![DeleteStep::Validate];
        if force {
            steps.push(DeleteStep::CleanupLeftoverBootstrap);
        }
        if needs_bootstrap {
            steps.push(DeleteStep::CreateBootstrapCluster);
            steps.push(DeleteStep::InstallCapi);
        }
        if self_managed {
            steps.push(DeleteStep::MoveToBootstrap);
        }
        steps.push(DeleteStep::DeleteWorkloadCluster);
        if needs_bootstrap {
            steps.push(DeleteStep::DeleteBootstrapCluster);
        }
        steps.push(DeleteStep::CleanupClusterResources);
        steps
    }

    async fn run_step(&self, step: DeleteStep, ctx: &mut TaskContext) -> Result<StepOutcome> {
        let deps = &self.deps;
        let manager = &deps.cluster_manager;
        let name = ctx.spec.name().to_string();

        if managed_from_bootstrap(ctx)
            && matches!(
                step,
                DeleteStep::CleanupLeftoverBootstrap
                    | DeleteStep::CreateBootstrapCluster
                    | DeleteStep::InstallCapi
                    | DeleteStep::MoveToBootstrap
            )
        {
            info!(cluster = %name, step = %step, "skipped, resuming from existing bootstrap cluster");
            return Ok(StepOutcome::Continue);
        }

        match step {
            DeleteStep::Validate => {
                let self_managed = ctx.spec.cluster.is_self_managed();
                let target = ctx.resolve_target()?;
                let listed = manager.list_capi_clusters(&target).await;

                if let Ok(clusters) = &listed {
                    if clusters.iter().any(|c| c.name == name) {
                        if self_managed {
                            validations::validate_no_managed_clusters(clusters, &name)?;
                        }
                        ctx.management = Some(target);
                        return Ok(StepOutcome::Continue);
                    }
                }

                if self_managed {
                    if let Some(bootstrap) = self.resumable_bootstrap(&ctx.spec).await? {
                        warn!(
                            cluster = %name,
                            bootstrap = %bootstrap,
                            "cluster objects found on bootstrap cluster from an earlier run, resuming"
                        );
                        ctx.bootstrap = Some(bootstrap.clone());
                        ctx.management = Some(bootstrap);
                        return Ok(StepOutcome::Continue);
                    }
                }

                validations::validate_cluster_object_listed(&listed?, &target, &name)?;
                ctx.management = Some(target);
            }
            DeleteStep::CleanupLeftoverBootstrap => {
                let leftover = Cluster::new(bootstrap_cluster_name(&name), "");
                deps.bootstrapper
                    .delete_bootstrap_cluster(&leftover, DeleteBootstrapOptions { force_cleanup: true })
                    .await?;
            }
            DeleteStep::CreateBootstrapCluster => {
                let bootstrap = deps
                    .bootstrapper
                    .create_bootstrap_cluster(&ctx.spec, &ctx.cancel)
                    .await?;
                ctx.bootstrap = Some(bootstrap);
            }
            DeleteStep::InstallCapi => {
                let infrastructure = deps.provider.clusterctl_infrastructure(&ctx.spec);
                deps.bootstrapper
                    .install_capi(ctx.bootstrap()?, &infrastructure, &ctx.cancel)
                    .await?;
            }
            DeleteStep::MoveToBootstrap => {
                let bootstrap = ctx.bootstrap()?.clone();
                manager
                    .move_capi(ctx.management()?, &bootstrap, &name, &ctx.cancel)
                    .await?;
                ctx.management = Some(bootstrap);
            }
            DeleteStep::DeleteWorkloadCluster => {
                manager
                    .delete_cluster(ctx.management()?, &name, &ctx.cancel)
                    .await?;
                info!(cluster = %name, "workload cluster deleted");
            }
            DeleteStep::DeleteBootstrapCluster => {
                let bootstrap = ctx.bootstrap()?.clone();
                deps.bootstrapper
                    .delete_bootstrap_cluster(&bootstrap, self.bootstrap_options())
                    .await?;
                ctx.bootstrap = None;
            }
            DeleteStep::CleanupClusterResources => {
                if !ctx.spec.cluster.is_self_managed() {
                    let management = require_management_cluster(&ctx.spec)?;
                    if let Err(e) = manager.delete_strata_resources(management, &ctx.spec).await {
                        warn!(cluster = %name, error = %e, "failed to remove recorded cluster spec");
                    }
                }
                if let Err(e) = manager.remove_cluster_files(&name) {
                    warn!(cluster = %name, error = %e, "failed to remove cluster files");
                }
            }
        }
        Ok(StepOutcome::Continue)
    }

    async fn compensate(&self, step: DeleteStep, ctx: &mut TaskContext) -> Result<()> {
        if step != DeleteStep::CreateBootstrapCluster {
            return Ok(());
        }
        let Some(bootstrap) = ctx.bootstrap.take() else {
            return Ok(());
        };
        // Once the objects live in the bootstrap cluster it is the only
        // thing still managing the workload.
        if ctx.management.as_ref() == Some(&bootstrap) {
            warn!(
                bootstrap = %bootstrap,
                kubeconfig = %bootstrap.kubeconfig_file.display(),
                "bootstrap cluster holds the cluster's CAPI objects, keeping it"
            );
            return Ok(());
        }
        self.deps
            .bootstrapper
            .delete_bootstrap_cluster(&bootstrap, DeleteBootstrapOptions { force_cleanup: true })
            .await
    }
}
