//! Resolved cluster specification
//!
//! A [`ClusterSpec`] is the desired state a workflow converges to: the
//! declarative cluster object, the version bundle resolved for its Kubernetes
//! version and, for clusters managed by another cluster, a handle to that
//! management cluster. Workflows only read it; derived values are carried in
//! copies.

use std::path::Path;

use serde::Deserialize;

use crate::bundle::{Bundles, VersionsBundle};
use crate::crd::{GitOpsConfig, StrataCluster, Taint};
use crate::features::{taints_support, FeatureFlags};
use crate::types::Cluster;
use crate::{Error, Result};

/// Desired state of one cluster
#[derive(Clone, Debug)]
pub struct ClusterSpec {
    /// The declarative cluster object
    pub cluster: StrataCluster,
    /// Component versions for the cluster's Kubernetes version
    pub versions_bundle: VersionsBundle,
    /// Release number of the bundle the versions came from
    pub bundles_number: u32,
    /// Flux settings, present when the cluster references one
    pub git_ops_config: Option<GitOpsConfig>,
    /// Handle to the managing cluster when not self-managed
    pub management_cluster: Option<Cluster>,
}

impl ClusterSpec {
    /// Build a spec from a cluster object and a bundle release
    pub fn new(cluster: StrataCluster, bundles: &Bundles) -> Result<Self> {
        let name = cluster.cluster_name().to_string();
        if name.is_empty() {
            return Err(Error::validation("cluster must have a name"));
        }
        let versions_bundle = bundles
            .versions_bundle(&cluster.spec.kubernetes_version)
            .map_err(|e| Error::validation_for(&name, e.to_string()))?
            .clone();

        Ok(Self {
            cluster,
            versions_bundle,
            bundles_number: bundles.number,
            git_ops_config: None,
            management_cluster: None,
        })
    }

    /// Build a spec around a versions bundle resolved earlier, for example
    /// the one recorded on a live cluster object
    pub fn with_versions_bundle(
        cluster: StrataCluster,
        versions_bundle: VersionsBundle,
        bundles_number: u32,
    ) -> Result<Self> {
        if cluster.cluster_name().is_empty() {
            return Err(Error::validation("cluster must have a name"));
        }
        Ok(Self {
            cluster,
            versions_bundle,
            bundles_number,
            git_ops_config: None,
            management_cluster: None,
        })
    }

    /// Parse a multi-document cluster config.
    ///
    /// Exactly one `StrataCluster` document is required. A `GitOpsConfig`
    /// document is required when the cluster references one; documents of
    /// other kinds (machine and datacenter configs) are ignored here.
    pub fn from_yaml(content: &str, bundles: &Bundles) -> Result<Self> {
        let mut cluster: Option<StrataCluster> = None;
        let mut git_ops: Vec<GitOpsConfig> = Vec::new();

        for doc in serde_yaml::Deserializer::from_str(content) {
            let value = serde_yaml::Value::deserialize(doc)?;
            let kind = value.get("kind").and_then(|k| k.as_str()).unwrap_or_default();
            match kind {
                "StrataCluster" => {
                    if cluster.is_some() {
                        return Err(Error::validation(
                            "cluster config contains more than one StrataCluster",
                        ));
                    }
                    cluster = Some(serde_yaml::from_value(value).map_err(|e| {
                        Error::serialization_for_kind("StrataCluster", e.to_string())
                    })?);
                }
                "GitOpsConfig" => git_ops.push(serde_yaml::from_value(value).map_err(|e| {
                    Error::serialization_for_kind("GitOpsConfig", e.to_string())
                })?),
                _ => {}
            }
        }

        let cluster =
            cluster.ok_or_else(|| Error::validation("cluster config has no StrataCluster"))?;
        let mut spec = Self::new(cluster, bundles)?;

        if let Some(git_ops_ref) = spec.cluster.spec.git_ops_ref.clone() {
            let config = git_ops
                .into_iter()
                .find(|g| g.metadata.name.as_deref() == Some(git_ops_ref.name.as_str()))
                .ok_or_else(|| {
                    Error::validation_for_field(
                        spec.name(),
                        "spec.gitOpsRef",
                        format!("GitOpsConfig {} not found in cluster config", git_ops_ref.name),
                    )
                })?;
            spec.git_ops_config = Some(config);
        }

        Ok(spec)
    }

    /// Read and parse a cluster config file
    pub fn load(path: &Path, bundles: &Bundles) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::internal_with_context(
                "cluster_spec",
                format!("failed to read cluster config {}: {}", path.display(), e),
            )
        })?;
        Self::from_yaml(&content, bundles)
    }

    /// Cluster name
    pub fn name(&self) -> &str {
        self.cluster.cluster_name()
    }

    /// Kubernetes version tag from the bundle (e.g., "v1.29.4")
    pub fn kubernetes_version_tag(&self) -> &str {
        &self.versions_bundle.kube_distro.kubernetes.tag
    }

    /// Control plane taints
    pub fn control_plane_taints(&self) -> &[Taint] {
        &self.cluster.spec.control_plane_configuration.taints
    }

    /// Reject control plane taints while the taints feature is inactive.
    ///
    /// Taints are never silently dropped from generated manifests.
    pub fn validate_taints_support(&self, features: &FeatureFlags) -> Result<()> {
        if self.control_plane_taints().is_empty() || features.is_active(&taints_support()) {
            return Ok(());
        }
        Err(Error::validation_for_field(
            self.name(),
            "spec.controlPlaneConfiguration.taints",
            "Taints feature is not enabled.",
        ))
    }

    /// Copy with a management cluster handle attached
    pub fn with_management_cluster(&self, management: Cluster) -> Self {
        Self {
            management_cluster: Some(management),
            ..self.clone()
        }
    }

    /// Copy with a different bundle release number
    pub fn with_bundles_number(&self, number: u32) -> Self {
        Self {
            bundles_number: number,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
apiVersion: strata.dev/v1alpha1
kind: StrataCluster
metadata:
  name: dev
spec:
  kubernetesVersion: "1.29"
  controlPlaneConfiguration:
    count: 1
  workerNodeGroupConfigurations:
    - count: 1
  datacenterRef:
    kind: DockerDatacenterConfig
    name: dev
  gitOpsRef:
    kind: GitOpsConfig
    name: dev-flux
---
apiVersion: strata.dev/v1alpha1
kind: DockerDatacenterConfig
metadata:
  name: dev
spec: {}
---
apiVersion: strata.dev/v1alpha1
kind: GitOpsConfig
metadata:
  name: dev-flux
spec:
  owner: acme
  repository: fleet
"#;

    fn bundles() -> Bundles {
        Bundles::embedded().unwrap()
    }

    #[test]
    fn parses_cluster_and_gitops_documents() {
        let spec = ClusterSpec::from_yaml(CONFIG, &bundles()).unwrap();
        assert_eq!(spec.name(), "dev");
        assert_eq!(spec.versions_bundle.kube_version, "1.29");

        let gitops = spec.git_ops_config.unwrap();
        assert_eq!(gitops.spec.branch, "main");
        assert_eq!(gitops.cluster_config_path("dev"), "clusters/dev");
    }

    #[test]
    fn missing_gitops_document_is_validation_error() {
        let config = CONFIG.replace("name: dev-flux\nspec:", "name: other\nspec:");
        let err = ClusterSpec::from_yaml(&config, &bundles()).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("dev-flux"));
    }

    #[test]
    fn missing_cluster_document_is_rejected() {
        let err = ClusterSpec::from_yaml("kind: DockerDatacenterConfig\n", &bundles()).unwrap_err();
        assert!(err.to_string().contains("no StrataCluster"));
    }

    #[test]
    fn unsupported_kubernetes_version_is_rejected() {
        let config = CONFIG.replace("\"1.29\"", "\"1.10\"");
        let err = ClusterSpec::from_yaml(&config, &bundles()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn taints_require_the_feature_flag() {
        let config = CONFIG.replace(
            "    count: 1\n  workerNodeGroupConfigurations",
            "    count: 1\n    taints:\n      - key: dedicated\n        effect: NoSchedule\n  workerNodeGroupConfigurations",
        );
        let spec = ClusterSpec::from_yaml(&config, &bundles()).unwrap();
        assert_eq!(spec.control_plane_taints().len(), 1);

        let flags = FeatureFlags::new();
        flags.store(crate::features::TAINTS_SUPPORT, false);
        let err = spec.validate_taints_support(&flags).unwrap_err();
        assert!(err.to_string().contains("Taints feature is not enabled."));

        flags.enable(&taints_support());
        assert!(spec.validate_taints_support(&flags).is_ok());
    }

    #[test]
    fn untainted_spec_passes_without_the_flag() {
        let spec = ClusterSpec::from_yaml(CONFIG, &bundles()).unwrap();
        let flags = FeatureFlags::new();
        flags.store(crate::features::TAINTS_SUPPORT, false);
        assert!(spec.validate_taints_support(&flags).is_ok());
    }

    #[test]
    fn derived_copies_leave_original_untouched() {
        let spec = ClusterSpec::from_yaml(CONFIG, &bundles()).unwrap();
        let bumped = spec.with_bundles_number(spec.bundles_number + 1);
        let managed = spec.with_management_cluster(Cluster::new("mgmt", "/tmp/mgmt.kubeconfig"));

        assert_eq!(bumped.bundles_number, spec.bundles_number + 1);
        assert!(managed.management_cluster.is_some());
        assert!(spec.management_cluster.is_none());
    }
}
