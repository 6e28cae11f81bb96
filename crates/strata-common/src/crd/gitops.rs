//! GitOpsConfig Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Flux bootstrap settings for a cluster's GitOps repository
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "GitOpsConfig",
    plural = "gitopsconfigs",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsConfigSpec {
    /// GitHub owner (user or organization)
    pub owner: String,

    /// Repository name
    pub repository: String,

    /// Branch Flux reconciles from
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Path inside the repository holding cluster configs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_config_path: Option<String>,

    /// Whether `owner` is a personal account rather than an organization
    #[serde(default)]
    pub personal: bool,
}

fn default_branch() -> String {
    "main".to_string()
}

impl GitOpsConfig {
    /// Config path for a cluster, defaulting to `clusters/<name>`
    pub fn cluster_config_path(&self, cluster_name: &str) -> String {
        self.spec
            .cluster_config_path
            .clone()
            .unwrap_or_else(|| format!("clusters/{}", cluster_name))
    }
}
