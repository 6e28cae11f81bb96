//! Upgrade workflow
//!
//! Upgrades run in place on the cluster that already holds the workload's
//! CAPI objects; no bootstrap cluster is involved. The spec recorded at the
//! last create or upgrade is read back and diffed against the new one, and
//! a run with nothing to change stops before touching any object.

use std::fmt;

use async_trait::async_trait;
use tracing::info;

use strata_common::bundle::Bundles;
use strata_common::crd::Taint;
use strata_common::{ClusterSpec, Result};

use super::{Dependencies, StepOutcome, TaskContext, Workflow};
use crate::differ::SpecDiffer;
use crate::validations;

/// Steps of the upgrade workflow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeStep {
    Validate,
    ComputeDiff,
    SetupAndValidate,
    GenerateCapiSpec,
    ApplyAndWait,
    UpdateStrataResources,
    InstallAddons,
}

impl fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpgradeStep::Validate => "validate",
            UpgradeStep::ComputeDiff => "compute diff",
            UpgradeStep::SetupAndValidate => "setup and validate",
            UpgradeStep::GenerateCapiSpec => "generate CAPI spec",
            UpgradeStep::ApplyAndWait => "apply and wait for version convergence",
            UpgradeStep::UpdateStrataResources => "update Strata resources",
            UpgradeStep::InstallAddons => "install add-ons",
        };
        f.write_str(name)
    }
}

/// Upgrade an existing cluster in place
pub struct Upgrade {
    deps: Dependencies,
    bundles: Bundles,
}

impl Upgrade {
    /// Upgrade workflow; `bundles` resolves the versions of the live spec
    pub fn new(deps: Dependencies, bundles: Bundles) -> Self {
        Self { deps, bundles }
    }

    /// Run to completion, compensating on failure
    pub async fn run(&self, ctx: &mut TaskContext) -> Result<()> {
        super::run(self, ctx).await
    }
}

fn sorted_taints(spec: &ClusterSpec) -> Vec<Taint> {
    let mut taints = spec.control_plane_taints().to_vec();
    taints.sort();
    taints
}

/// True when applying `new` over `current` would change nothing
fn is_noop(current: &ClusterSpec, new: &ClusterSpec, diffs: &[strata_common::ComponentChangeDiff]) -> bool {
    diffs.is_empty()
        && current.cluster.equal(&new.cluster)
        && sorted_taints(current) == sorted_taints(new)
}

fn git_ops_changed(current: &ClusterSpec, new: &ClusterSpec) -> bool {
    current.git_ops_config.as_ref().map(|g| &g.spec) != new.git_ops_config.as_ref().map(|g| &g.spec)
}

#[async_trait]
impl Workflow for Upgrade {
    type Step = UpgradeStep;
    const NAME: &'static str = "upgrade";

    fn steps(&self, _ctx: &TaskContext) -> Vec<UpgradeStep> {
        vec![
            UpgradeStep::Validate,
            UpgradeStep::ComputeDiff,
            UpgradeStep::SetupAndValidate,
            UpgradeStep::GenerateCapiSpec,
            UpgradeStep::ApplyAndWait,
            UpgradeStep::UpdateStrataResources,
            UpgradeStep::InstallAddons,
        ]
    }

    async fn run_step(&self, step: UpgradeStep, ctx: &mut TaskContext) -> Result<StepOutcome> {
        let deps = &self.deps;
        let manager = &deps.cluster_manager;

        match step {
            UpgradeStep::Validate => {
                let management = ctx.resolve_target()?;
                validations::validate_upgrade(manager.as_ref(), &management, &ctx.spec, &deps.features)
                    .await?;
                ctx.management = Some(management);
            }
            UpgradeStep::ComputeDiff => {
                let current = manager
                    .get_cluster_spec(ctx.management()?, ctx.spec.name(), &self.bundles)
                    .await?;
                validations::validate_immutable_fields(&current, &ctx.spec)?;

                let diffs = SpecDiffer::for_provider(deps.provider.clone()).diff(&current, &ctx.spec);
                if is_noop(&current, &ctx.spec, &diffs) {
                    info!(cluster = %ctx.spec.name(), "no changes detected, cluster is up to date");
                    return Ok(StepOutcome::Done);
                }
                info!(cluster = %ctx.spec.name(), changes = %SpecDiffer::summary(&diffs), "upgrading cluster");
                ctx.current_spec = Some(current);
                ctx.diffs = diffs;
            }
            UpgradeStep::SetupAndValidate => {
                deps.provider.setup_and_validate_upgrade(&ctx.spec).await?;
            }
            UpgradeStep::GenerateCapiSpec => {
                let management = ctx.management()?;
                let manifests = deps
                    .provider
                    .generate_capi_spec_for_upgrade(management, management, ctx.current_spec()?, &ctx.spec)
                    .await?;
                ctx.manifests = Some(manifests);
            }
            UpgradeStep::ApplyAndWait => {
                let management = ctx.management()?;
                let manifests = ctx.manifests()?;
                let cancel = &ctx.cancel;
                manager
                    .apply_manifests(management, &manifests.control_plane, cancel)
                    .await?;
                manager.apply_manifests(management, &manifests.workers, cancel).await?;
                manager
                    .wait_for_version_convergence(
                        management,
                        ctx.spec.name(),
                        ctx.spec.kubernetes_version_tag(),
                        cancel,
                    )
                    .await?;
            }
            UpgradeStep::UpdateStrataResources => {
                manager
                    .install_strata_resources(ctx.management()?, &ctx.spec, &ctx.cancel)
                    .await?;
            }
            UpgradeStep::InstallAddons => {
                if git_ops_changed(ctx.current_spec()?, &ctx.spec) {
                    deps.addons
                        .install_gitops(ctx.management()?, &ctx.spec, &ctx.cancel)
                        .await?;
                }
                info!(cluster = %ctx.spec.name(), "cluster upgraded");
            }
        }
        Ok(StepOutcome::Continue)
    }
}
