//! Cluster API manifest generation and infrastructure providers
//!
//! This crate provides:
//! - `CAPIManifest`, the untyped CAPI object model rendered to YAML
//! - `CapiClient` for reading live CAPI objects on a cluster
//! - the `Provider` capability contract and the Docker implementation

pub mod client;
pub mod constants;
pub mod manifest;
pub mod provider;

pub use client::{
    CapiClient, CapiClusterInfo, KubeCapiClient, KubeadmControlPlaneInfo, MachineDeploymentInfo,
};

#[cfg(test)]
pub use client::MockCapiClient;

pub use manifest::{create_cluster_labels, render_documents, CAPIManifest, ManifestMetadata};

pub use provider::{
    create_provider, CapiSpecGenerator, ChangeDiffReporter, Clock, DockerCli, DockerClient,
    DockerProvider, GeneratedManifests, InfrastructureBundle, InfrastructureBundleSource,
    KubeconfigRewriter, MoveKind, Provider, ProviderValidator,
};
