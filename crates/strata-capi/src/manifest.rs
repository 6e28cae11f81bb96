//! Untyped CAPI objects and their YAML rendering
//!
//! Generated manifests are built as [`CAPIManifest`] values and rendered into
//! one multi-document YAML stream per manifest set. Rendering is
//! deterministic: identical inputs always produce identical bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strata_common::{Error, Result};

use crate::constants::{CLUSTER_NAME_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE};

/// CAPI manifest representation
///
/// A simplified representation of a Kubernetes manifest for CAPI resources.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CAPIManifest {
    /// API version of the resource
    pub api_version: String,
    /// Kind of the resource
    pub kind: String,
    /// Resource metadata
    pub metadata: ManifestMetadata,
    /// Resource spec (as JSON value for flexibility)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<serde_json::Value>,
}

/// Manifest metadata
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Resource name
    pub name: String,
    /// Resource namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Resource labels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

impl CAPIManifest {
    /// Create a new CAPI manifest
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: ManifestMetadata {
                name: name.into(),
                namespace: Some(namespace.into()),
                labels: None,
            },
            spec: None,
        }
    }

    /// Set the spec
    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Set labels
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.metadata.labels = Some(labels);
        self
    }

    /// Name of the object
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Render to a single YAML document
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::serialization_for_kind(&self.kind, e.to_string()))
    }
}

/// Labels attached to every object generated for a cluster
pub fn create_cluster_labels(cluster_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(CLUSTER_NAME_LABEL.to_string(), cluster_name.to_string());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels
}

/// Render manifests into one `---`-separated YAML stream
pub fn render_documents(manifests: &[CAPIManifest]) -> Result<Vec<u8>> {
    let mut out = String::new();
    for manifest in manifests {
        out.push_str("---\n");
        out.push_str(&manifest.to_yaml()?);
    }
    Ok(out.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(name: &str) -> CAPIManifest {
        CAPIManifest::new("cluster.x-k8s.io/v1beta1", "Cluster", name, "strata-system")
            .with_labels(create_cluster_labels(name))
            .with_spec(json!({"paused": false, "clusterNetwork": {"services": {"cidrBlocks": ["10.128.0.0/12"]}}}))
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let yaml = sample("dev").to_yaml().unwrap();
        assert!(yaml.contains("apiVersion: cluster.x-k8s.io/v1beta1"));
        assert!(yaml.contains("kind: Cluster"));
        assert!(yaml.contains("cluster.x-k8s.io/cluster-name: dev"));
        assert!(yaml.contains("app.kubernetes.io/managed-by: strata"));
    }

    #[test]
    fn omits_empty_optional_fields() {
        let yaml = CAPIManifest::new("v1", "Namespace", "x", "y").to_yaml().unwrap();
        assert!(!yaml.contains("spec"));
        assert!(!yaml.contains("labels"));
    }

    #[test]
    fn renders_each_manifest_as_its_own_document() {
        let bytes = render_documents(&[sample("a"), sample("b")]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.matches("---\n").count(), 2);

        let docs = strata_common::kube_utils::split_documents(text.as_bytes()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["metadata"]["name"], "a");
        assert_eq!(docs[1]["metadata"]["name"], "b");
    }

    #[test]
    fn rendering_is_byte_stable() {
        let first = render_documents(&[sample("dev")]).unwrap();
        let second = render_documents(&[sample("dev")]).unwrap();
        assert_eq!(first, second);
    }
}
