//! State shared by the steps of one workflow run

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use strata_capi::{GeneratedManifests, Provider};
use strata_common::{Cluster, ClusterSpec, ComponentChangeDiff, Error, FeatureFlags, Result};

use crate::addons::AddonInstaller;
use crate::bootstrap::Bootstrapper;
use crate::manager::ClusterManager;
use crate::validations::require_management_cluster;

/// Collaborators a workflow drives, built once by the caller
#[derive(Clone)]
pub struct Dependencies {
    /// Infrastructure back-end for the cluster's datacenter kind
    pub provider: Arc<dyn Provider>,
    /// Ephemeral bootstrap cluster lifecycle
    pub bootstrapper: Arc<dyn Bootstrapper>,
    /// CAPI object application, waits and moves
    pub cluster_manager: Arc<dyn ClusterManager>,
    /// Post-install add-ons
    pub addons: Arc<dyn AddonInstaller>,
    /// Feature flag cache shared across runs
    pub features: Arc<FeatureFlags>,
}

/// Mutable state threaded through one run
///
/// `spec` is never modified by a step; values derived from it are stored in
/// the other fields.
#[derive(Debug)]
pub struct TaskContext {
    /// Desired state of the cluster
    pub spec: ClusterSpec,
    /// Cancels the run between steps and during waits
    pub cancel: CancellationToken,
    /// Kubeconfig of an existing self-managed cluster
    pub workload_kubeconfig: Option<PathBuf>,
    /// Bootstrap cluster, once created
    pub bootstrap: Option<Cluster>,
    /// Workload cluster, once reachable
    pub workload: Option<Cluster>,
    /// Cluster holding the workload's CAPI objects
    pub management: Option<Cluster>,
    /// Spec read back from the live cluster (upgrade)
    pub current_spec: Option<ClusterSpec>,
    /// Manifests generated for this run
    pub manifests: Option<GeneratedManifests>,
    /// Component changes between `current_spec` and `spec`
    pub diffs: Vec<ComponentChangeDiff>,
}

impl TaskContext {
    /// Context for a run converging to `spec`
    pub fn new(spec: ClusterSpec, cancel: CancellationToken) -> Self {
        Self {
            spec,
            cancel,
            workload_kubeconfig: None,
            bootstrap: None,
            workload: None,
            management: None,
            current_spec: None,
            manifests: None,
            diffs: Vec::new(),
        }
    }

    /// Attach the kubeconfig of an existing self-managed cluster
    pub fn with_workload_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.workload_kubeconfig = Some(path.into());
        self
    }

    /// The cluster that holds this cluster's CAPI objects today.
    ///
    /// A self-managed cluster holds its own; any other cluster is held by the
    /// management cluster attached to the spec.
    pub fn resolve_target(&self) -> Result<Cluster> {
        if self.spec.cluster.is_self_managed() {
            let kubeconfig = self.workload_kubeconfig.clone().ok_or_else(|| {
                Error::validation_for(
                    self.spec.name(),
                    format!("KubeConfig doesn't exists for cluster {}", self.spec.name()),
                )
            })?;
            return Ok(Cluster::new(self.spec.name(), kubeconfig));
        }
        require_management_cluster(&self.spec).cloned()
    }

    pub(crate) fn bootstrap(&self) -> Result<&Cluster> {
        self.bootstrap
            .as_ref()
            .ok_or_else(|| Error::internal_with_context("workflow", "bootstrap cluster not created"))
    }

    pub(crate) fn workload(&self) -> Result<&Cluster> {
        self.workload
            .as_ref()
            .ok_or_else(|| Error::internal_with_context("workflow", "workload cluster not created"))
    }

    pub(crate) fn management(&self) -> Result<&Cluster> {
        self.management
            .as_ref()
            .ok_or_else(|| Error::internal_with_context("workflow", "management cluster not resolved"))
    }

    pub(crate) fn manifests(&self) -> Result<&GeneratedManifests> {
        self.manifests
            .as_ref()
            .ok_or_else(|| Error::internal_with_context("workflow", "manifests not generated"))
    }

    pub(crate) fn current_spec(&self) -> Result<&ClusterSpec> {
        self.current_spec
            .as_ref()
            .ok_or_else(|| Error::internal_with_context("workflow", "current spec not read"))
    }
}
