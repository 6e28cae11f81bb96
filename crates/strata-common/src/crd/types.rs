//! Shared types for the StrataCluster spec

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a named infrastructure object (machine config, datacenter config)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Ref {
    /// Object kind (e.g., "DockerMachineConfig")
    pub kind: String,
    /// Object name
    pub name: String,
}

impl Ref {
    /// Create a new reference
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Externally reachable control plane address
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Host or IP of the endpoint
    #[serde(default)]
    pub host: String,
}

/// Effect of a node taint
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaintEffect {
    /// Do not schedule new pods
    NoSchedule,
    /// Avoid scheduling new pods
    PreferNoSchedule,
    /// Evict running pods
    NoExecute,
}

impl fmt::Display for TaintEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaintEffect::NoSchedule => write!(f, "NoSchedule"),
            TaintEffect::PreferNoSchedule => write!(f, "PreferNoSchedule"),
            TaintEffect::NoExecute => write!(f, "NoExecute"),
        }
    }
}

/// Node taint applied through kubeadm node registration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    /// Taint key
    pub key: String,
    /// Taint value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Taint effect
    pub effect: TaintEffect,
}

/// Control plane node configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneConfiguration {
    /// Number of control plane nodes
    pub count: u32,

    /// Control plane endpoint; back-ends that allocate their own reject it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,

    /// Machine config for control plane nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_group_ref: Option<Ref>,

    /// Taints registered on control plane nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
}

impl PartialEq for ControlPlaneConfiguration {
    /// Compares count, endpoint host and machine group. An absent endpoint
    /// differs from a present one with an empty host.
    fn eq(&self, other: &Self) -> bool {
        self.count == other.count
            && self.endpoint == other.endpoint
            && self.machine_group_ref == other.machine_group_ref
    }
}

/// Worker node group configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct WorkerNodeGroupConfiguration {
    /// Group name, used in generated object names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Number of nodes in the group
    pub count: u32,

    /// Machine config for the group's nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_group_ref: Option<Ref>,
}

/// External etcd topology
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEtcdConfiguration {
    /// Number of etcd members
    pub count: u32,

    /// Machine config for etcd members
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_group_ref: Option<Ref>,
}

/// List of CIDR blocks
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CidrBlocks {
    /// CIDR blocks in declaration order
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
}

/// Pod and service networking
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetwork {
    /// Pod CIDRs
    #[serde(default)]
    pub pods: CidrBlocks,
    /// Service CIDRs
    #[serde(default)]
    pub services: CidrBlocks,
}

/// HTTP proxy settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfiguration {
    /// HTTP proxy URL
    #[serde(default)]
    pub http_proxy: String,
    /// HTTPS proxy URL
    #[serde(default)]
    pub https_proxy: String,
    /// Hosts that bypass the proxy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub no_proxy: Vec<String>,
}

/// Local registry mirror
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMirrorConfiguration {
    /// Mirror endpoint host
    pub endpoint: String,
    /// PEM CA bundle used to trust the mirror
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca_cert_content: String,
}

/// Management cluster linkage
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagementCluster {
    /// Name of the cluster managing this one; empty means self-managed
    #[serde(default)]
    pub name: String,
}

/// Compare two slices as multisets.
///
/// Order is ignored; duplicates must appear the same number of times.
pub(crate) fn multiset_eq<T: Eq + Hash>(a: &[T], b: &[T]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut counts: HashMap<&T, i64> = HashMap::with_capacity(a.len());
    for item in a {
        *counts.entry(item).or_default() += 1;
    }
    for item in b {
        match counts.get_mut(item) {
            Some(n) if *n > 0 => *n -= 1,
            _ => return false,
        }
    }
    true
}
