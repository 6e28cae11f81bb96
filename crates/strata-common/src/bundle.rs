//! Component version bundles
//!
//! A bundle release pins, per Kubernetes minor version, every image and
//! manifest the lifecycle needs: the Kubernetes distro images, the kind node
//! image and each infrastructure provider's components. Providers and the
//! spec differ read the resolved [`VersionsBundle`] and never fetch versions
//! on their own.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Bundle release shipped with the binary, used unless overridden
const DEFAULT_BUNDLES: &str = include_str!("../bundles/default-bundles.yaml");

/// Container image reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Human-readable name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Full image URI including tag
    pub uri: String,
}

impl Image {
    /// Image repository without the tag
    pub fn image(&self) -> &str {
        match self.uri.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => repo,
            _ => &self.uri,
        }
    }

    /// Image tag, empty when untagged
    pub fn tag(&self) -> &str {
        match self.uri.rsplit_once(':') {
            Some((_, tag)) if !tag.contains('/') => tag,
            _ => "",
        }
    }
}

/// Manifest reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Location of the manifest
    pub uri: String,
}

/// Image repository with a pinned tag
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRepository {
    /// Image repository
    pub repository: String,
    /// Image tag
    pub tag: String,
}

/// Kubernetes distribution images
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubeDistro {
    /// Control plane component images
    pub kubernetes: VersionedRepository,
    /// CoreDNS image
    #[serde(rename = "coreDNS")]
    pub core_dns: VersionedRepository,
    /// etcd image
    pub etcd: VersionedRepository,
}

/// Docker infrastructure provider components
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DockerBundle {
    /// Provider release version (e.g., "v1.6.0")
    pub version: String,
    /// Controller manager image
    pub manager: Image,
    /// RBAC proxy image
    pub kube_proxy: Image,
    /// Provider components manifest
    pub components: Manifest,
    /// clusterctl metadata manifest
    pub metadata: Manifest,
    /// Cluster template manifest
    pub cluster_template: Manifest,
}

/// Everything pinned for one Kubernetes minor version
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionsBundle {
    /// Kubernetes minor version this bundle serves (e.g., "1.29")
    pub kube_version: String,
    /// Kubernetes distribution images
    pub kube_distro: KubeDistro,
    /// kind node image used for Docker machines
    pub kind_node: Image,
    /// Docker provider components
    pub docker: DockerBundle,
}

/// A bundle release
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bundles {
    /// Monotonic release number
    pub number: u32,
    /// One entry per supported Kubernetes minor version
    pub versions_bundles: Vec<VersionsBundle>,
}

impl Bundles {
    /// The release compiled into the binary
    pub fn embedded() -> Result<Self> {
        Self::from_yaml(DEFAULT_BUNDLES)
    }

    /// Parse a bundle release document
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::serialization_for_kind("Bundles", e.to_string()))
    }

    /// Load a bundle release from a file (`--bundles-override`)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::internal_with_context(
                "bundles",
                format!("failed to read bundles file {}: {}", path.display(), e),
            )
        })?;
        Self::from_yaml(&content)
    }

    /// Bundle for a Kubernetes minor version
    pub fn versions_bundle(&self, kube_version: &str) -> Result<&VersionsBundle> {
        self.versions_bundles
            .iter()
            .find(|b| b.kube_version == kube_version)
            .ok_or_else(|| {
                Error::validation(format!(
                    "kubernetes version {} is not supported by bundles release {}",
                    kube_version, self.number
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_bundles_parse() {
        let bundles = Bundles::embedded().unwrap();
        assert!(bundles.number > 0);
        assert!(!bundles.versions_bundles.is_empty());

        let vb = bundles.versions_bundle("1.29").unwrap();
        assert!(vb.docker.version.starts_with('v'));
        assert!(!vb.kind_node.uri.is_empty());
    }

    #[test]
    fn unsupported_version_is_validation_error() {
        let bundles = Bundles::embedded().unwrap();
        let err = bundles.versions_bundle("1.2").unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("1.2"));
    }

    #[test]
    fn image_splits_repository_and_tag() {
        let image = Image {
            name: String::new(),
            uri: "registry.local:5000/kind/node:v1.29.1".to_string(),
        };
        assert_eq!(image.image(), "registry.local:5000/kind/node");
        assert_eq!(image.tag(), "v1.29.1");

        let untagged = Image {
            name: String::new(),
            uri: "registry.local:5000/kind/node".to_string(),
        };
        assert_eq!(untagged.image(), "registry.local:5000/kind/node");
        assert_eq!(untagged.tag(), "");
    }

    #[test]
    fn bundles_file_override_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundles.yaml");
        std::fs::write(&path, DEFAULT_BUNDLES.replace("number: 3", "number: 42")).unwrap();

        let bundles = Bundles::from_file(&path).unwrap();
        assert_eq!(bundles.number, 42);
    }
}
