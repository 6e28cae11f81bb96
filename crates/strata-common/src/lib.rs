//! Common types and utilities for Strata
//!
//! Holds everything the provider, cluster and CLI crates share: the cluster
//! definition, the resolved version bundle, runtime cluster handles, the
//! feature flag cache, errors and the fixed-interval retry helpers.

#![deny(missing_docs)]

pub mod bundle;
pub mod clusterctl;
pub mod crd;
pub mod error;
pub mod features;
pub mod kube_utils;
pub mod kubeconfig;
pub mod process;
pub mod retry;
pub mod spec;
pub mod types;

pub use error::Error;
pub use features::FeatureFlags;
pub use spec::ClusterSpec;
pub use types::{Cluster, ComponentChangeDiff};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace holding the Cluster API objects Strata generates
pub const STRATA_SYSTEM_NAMESPACE: &str = "strata-system";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "strata";

/// CRD that must exist on a cluster able to manage others
pub const CAPI_CLUSTERS_CRD: &str = "clusters.cluster.x-k8s.io";

/// CRD for the Strata cluster definition itself
pub const STRATA_CLUSTERS_CRD: &str = "strataclusters.strata.dev";

/// Suffix of the ephemeral bootstrap cluster name
pub const BOOTSTRAP_CLUSTER_SUFFIX: &str = "strata-bootstrap";

/// Annotation recording the bundle release a cluster object was applied with
pub const BUNDLES_NUMBER_ANNOTATION: &str = "strata.dev/bundles-number";

/// Annotation holding the resolved versions bundle (JSON) a cluster object was applied with
pub const VERSIONS_BUNDLE_ANNOTATION: &str = "strata.dev/versions-bundle";
