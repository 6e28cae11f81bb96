//! Declarative cluster definition
//!
//! `StrataCluster` is what users write in their cluster config file. The rest
//! of the system treats it as plain data; the only logic here is the identity
//! and equality rules workflows rely on.

mod cluster;
mod gitops;
mod types;

pub use cluster::{StrataCluster, StrataClusterSpec};
pub use gitops::{GitOpsConfig, GitOpsConfigSpec};
pub use types::{
    ClusterNetwork, CidrBlocks, ControlPlaneConfiguration, Endpoint, ExternalEtcdConfiguration,
    ManagementCluster, ProxyConfiguration, Ref, RegistryMirrorConfiguration, Taint, TaintEffect,
    WorkerNodeGroupConfiguration,
};
