//! Infrastructure provider capability contract
//!
//! A provider is the one place that knows how a back-end turns a cluster
//! spec into CAPI objects. Workflows see it only through the capabilities
//! below, grouped into focused traits and combined by [`Provider`].
//!
//! # Implementing a provider
//!
//! A provider implements each capability trait and then [`Provider`] itself:
//!
//! ```ignore
//! #[async_trait]
//! impl ProviderValidator for MyProvider { /* ... */ }
//! #[async_trait]
//! impl CapiSpecGenerator for MyProvider { /* ... */ }
//! #[async_trait]
//! impl KubeconfigRewriter for MyProvider { /* ... */ }
//! impl ChangeDiffReporter for MyProvider { /* ... */ }
//! impl InfrastructureBundleSource for MyProvider { /* ... */ }
//!
//! impl Provider for MyProvider {
//!     fn name(&self) -> &'static str { "my-provider" }
//!     fn clusterctl_infrastructure(&self, spec: &ClusterSpec) -> String { todo!() }
//!     fn move_kinds(&self) -> Vec<MoveKind> { todo!() }
//! }
//! ```

mod docker;

use std::sync::Arc;

use async_trait::async_trait;
use strata_common::bundle::Manifest;
use strata_common::{Cluster, ClusterSpec, ComponentChangeDiff, Error, FeatureFlags, Result};

use crate::client::CapiClient;

pub use docker::{Clock, DockerCli, DockerClient, DockerProvider};

#[cfg(test)]
pub use docker::MockDockerClient;

/// Datacenter config kind handled by the Docker provider
pub const DOCKER_DATACENTER_KIND: &str = "DockerDatacenterConfig";

/// The two manifest sets generated for a cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneratedManifests {
    /// Cluster, infrastructure cluster, control plane and its template
    pub control_plane: Vec<u8>,
    /// Worker machine deployments with their templates
    pub workers: Vec<u8>,
}

/// Provider manifests packaged for air-gapped installs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfrastructureBundle {
    /// Folder the manifests are laid out under
    pub folder_name: String,
    /// Manifests to include
    pub manifests: Vec<Manifest>,
}

/// A CAPI kind that must be present on the target after a move
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MoveKind {
    /// API version of the kind
    pub api_version: &'static str,
    /// Kind name
    pub kind: &'static str,
}

impl MoveKind {
    /// Create a move kind
    pub const fn new(api_version: &'static str, kind: &'static str) -> Self {
        Self { api_version, kind }
    }
}

/// Back-end specific checks and setup before a workflow runs
#[async_trait]
pub trait ProviderValidator: Send + Sync {
    /// Validate a spec for creation and prepare provider state
    async fn setup_and_validate_create(&self, spec: &ClusterSpec) -> Result<()>;

    /// Validate a spec for upgrade and prepare provider state
    async fn setup_and_validate_upgrade(&self, spec: &ClusterSpec) -> Result<()>;
}

/// CAPI manifest generation
#[async_trait]
pub trait CapiSpecGenerator: Send + Sync {
    /// Generate manifests for a brand new cluster
    async fn generate_capi_spec_for_create(
        &self,
        bootstrap: &Cluster,
        spec: &ClusterSpec,
    ) -> Result<GeneratedManifests>;

    /// Generate manifests for an upgrade from `current` to `new`.
    ///
    /// Immutable template names in use on `management` are reused when
    /// nothing that affects the template changed.
    async fn generate_capi_spec_for_upgrade(
        &self,
        bootstrap: &Cluster,
        management: &Cluster,
        current: &ClusterSpec,
        new: &ClusterSpec,
    ) -> Result<GeneratedManifests>;
}

/// Kubeconfig fix-ups for back-ends whose API server is not directly reachable
#[async_trait]
pub trait KubeconfigRewriter: Send + Sync {
    /// Return the kubeconfig rewritten so the local host can reach the cluster
    async fn update_kubeconfig(&self, content: &str, cluster_name: &str) -> Result<String>;
}

/// Reports the provider component's version change between two specs
pub trait ChangeDiffReporter: Send + Sync {
    /// `None` when the provider version did not change
    fn change_diff(&self, current: &ClusterSpec, new: &ClusterSpec) -> Option<ComponentChangeDiff>;
}

/// Source of provider manifests for bundle packaging
pub trait InfrastructureBundleSource: Send + Sync {
    /// Provider manifests for the spec's bundle, `None` if the back-end has none
    fn get_infrastructure_bundle(&self, spec: &ClusterSpec) -> Option<InfrastructureBundle>;
}

/// Everything a workflow needs from an infrastructure back-end
pub trait Provider:
    ProviderValidator
    + CapiSpecGenerator
    + KubeconfigRewriter
    + ChangeDiffReporter
    + InfrastructureBundleSource
{
    /// Provider name
    fn name(&self) -> &'static str;

    /// clusterctl `--infrastructure` argument, e.g. `docker:v1.6.4`
    fn clusterctl_infrastructure(&self, spec: &ClusterSpec) -> String;

    /// Provider kinds that must exist on the target after a move
    fn move_kinds(&self) -> Vec<MoveKind>;
}

/// Create the provider for a spec's datacenter kind
pub fn create_provider(
    spec: &ClusterSpec,
    capi: Arc<dyn CapiClient>,
    features: Arc<FeatureFlags>,
) -> Result<Arc<dyn Provider>> {
    let kind = spec.cluster.spec.datacenter_ref.kind.as_str();
    match kind {
        DOCKER_DATACENTER_KIND => Ok(Arc::new(DockerProvider::new(
            Arc::new(DockerCli::new()),
            capi,
            features,
        ))),
        "VSphereDatacenterConfig" => Err(Error::provider(
            "vsphere",
            "vSphere provider not yet implemented",
        )),
        "AWSDatacenterConfig" => Err(Error::provider("aws", "AWS provider not yet implemented")),
        other => Err(Error::validation_for_field(
            spec.name(),
            "spec.datacenterRef.kind",
            format!("unsupported datacenter kind {:?}", other),
        )),
    }
}
