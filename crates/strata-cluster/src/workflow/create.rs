//! Create workflow
//!
//! Brings a cluster up through an ephemeral bootstrap cluster, then moves
//! its CAPI objects to their permanent home: the new cluster itself when it
//! is self-managed, otherwise the declared management cluster.

use std::fmt;

use async_trait::async_trait;
use tracing::{info, warn};

use strata_common::Result;

use super::{Dependencies, StepOutcome, TaskContext, Workflow};
use crate::bootstrap::DeleteBootstrapOptions;
use crate::validations::{self, require_management_cluster};

/// Create-time switches
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Leave the bootstrap cluster running when the run fails
    pub keep_bootstrap_on_failure: bool,
}

/// Steps of the create workflow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateStep {
    Validate,
    CreateBootstrapCluster,
    InstallCapi,
    SetupAndValidate,
    GenerateCapiSpec,
    ApplyControlPlane,
    CreateWorkloadCluster,
    MoveManagement,
    InstallStrataResources,
    InstallAddons,
    DeleteBootstrapCluster,
}

impl fmt::Display for CreateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CreateStep::Validate => "validate",
            CreateStep::CreateBootstrapCluster => "create bootstrap cluster",
            CreateStep::InstallCapi => "install CAPI on bootstrap cluster",
            CreateStep::SetupAndValidate => "setup and validate",
            CreateStep::GenerateCapiSpec => "generate CAPI spec",
            CreateStep::ApplyControlPlane => "apply control plane",
            CreateStep::CreateWorkloadCluster => "create workload cluster",
            CreateStep::MoveManagement => "move cluster management",
            CreateStep::InstallStrataResources => "install Strata resources",
            CreateStep::InstallAddons => "install add-ons",
            CreateStep::DeleteBootstrapCluster => "delete bootstrap cluster",
        };
        f.write_str(name)
    }
}

/// Create a cluster from scratch
pub struct Create {
    deps: Dependencies,
    options: CreateOptions,
}

impl Create {
    /// Create workflow over the given collaborators
    pub fn new(deps: Dependencies, options: CreateOptions) -> Self {
        Self { deps, options }
    }

    /// Run to completion, compensating on failure
    pub async fn run(&self, ctx: &mut TaskContext) -> Result<()> {
        super::run(self, ctx).await
    }
}

#[async_trait]
impl Workflow for Create {
    type Step = CreateStep;
    const NAME: &'static str = "create";

    fn steps(&self, _ctx: &TaskContext) -> Vec<CreateStep> {
        vec![
            CreateStep::Validate,
            CreateStep::CreateBootstrapCluster,
            CreateStep::InstallCapi,
            CreateStep::SetupAndValidate,
            CreateStep::GenerateCapiSpec,
            CreateStep::ApplyControlPlane,
            CreateStep::CreateWorkloadCluster,
            CreateStep::MoveManagement,
            CreateStep::InstallStrataResources,
            CreateStep::InstallAddons,
            CreateStep::DeleteBootstrapCluster,
        ]
    }

    async fn run_step(&self, step: CreateStep, ctx: &mut TaskContext) -> Result<StepOutcome> {
        let deps = &self.deps;
        let spec = &ctx.spec;
        let cancel = &ctx.cancel;

        match step {
            CreateStep::Validate => {
                validations::validate_create(deps.cluster_manager.as_ref(), spec, &deps.features)
                    .await?;
            }
            CreateStep::CreateBootstrapCluster => {
                let bootstrap = deps.bootstrapper.create_bootstrap_cluster(spec, cancel).await?;
                ctx.bootstrap = Some(bootstrap);
            }
            CreateStep::InstallCapi => {
                let infrastructure = deps.provider.clusterctl_infrastructure(spec);
                deps.bootstrapper
                    .install_capi(ctx.bootstrap()?, &infrastructure, cancel)
                    .await?;
            }
            CreateStep::SetupAndValidate => {
                deps.provider.setup_and_validate_create(spec).await?;
            }
            CreateStep::GenerateCapiSpec => {
                let manifests = deps
                    .provider
                    .generate_capi_spec_for_create(ctx.bootstrap()?, spec)
                    .await?;
                ctx.manifests = Some(manifests);
            }
            CreateStep::ApplyControlPlane => {
                let bootstrap = ctx.bootstrap()?;
                let manifests = ctx.manifests()?;
                let manager = &deps.cluster_manager;
                manager
                    .apply_manifests(bootstrap, &manifests.control_plane, cancel)
                    .await?;
                manager
                    .wait_for_control_plane_ready(bootstrap, spec.name(), cancel)
                    .await?;
                manager.apply_manifests(bootstrap, &manifests.workers, cancel).await?;
            }
            CreateStep::CreateWorkloadCluster => {
                let workload = deps
                    .cluster_manager
                    .create_workload_cluster(ctx.bootstrap()?, spec, cancel)
                    .await?;
                ctx.workload = Some(workload);
            }
            CreateStep::MoveManagement => {
                let target = if spec.cluster.is_self_managed() {
                    let workload = ctx.workload()?.clone();
                    let infrastructure = deps.provider.clusterctl_infrastructure(spec);
                    deps.bootstrapper
                        .install_capi(&workload, &infrastructure, cancel)
                        .await?;
                    workload
                } else {
                    require_management_cluster(spec)?.clone()
                };
                deps.cluster_manager
                    .move_capi(ctx.bootstrap()?, &target, spec.name(), cancel)
                    .await?;
                ctx.management = Some(target);
            }
            CreateStep::InstallStrataResources => {
                deps.cluster_manager
                    .install_strata_resources(ctx.management()?, spec, cancel)
                    .await?;
            }
            CreateStep::InstallAddons => {
                deps.addons
                    .install_gitops(ctx.management()?, spec, cancel)
                    .await?;
            }
            CreateStep::DeleteBootstrapCluster => {
                let bootstrap = ctx.bootstrap()?.clone();
                deps.bootstrapper
                    .delete_bootstrap_cluster(&bootstrap, DeleteBootstrapOptions::default())
                    .await?;
                ctx.bootstrap = None;
                info!(cluster = %spec.name(), "cluster created");
            }
        }
        Ok(StepOutcome::Continue)
    }

    async fn compensate(&self, step: CreateStep, ctx: &mut TaskContext) -> Result<()> {
        if step != CreateStep::CreateBootstrapCluster {
            return Ok(());
        }
        let Some(bootstrap) = ctx.bootstrap.take() else {
            return Ok(());
        };
        if self.options.keep_bootstrap_on_failure {
            warn!(bootstrap = %bootstrap, kubeconfig = %bootstrap.kubeconfig_file.display(), "keeping bootstrap cluster for debugging");
            return Ok(());
        }
        self.deps
            .bootstrapper
            .delete_bootstrap_cluster(&bootstrap, DeleteBootstrapOptions { force_cleanup: true })
            .await
    }
}
