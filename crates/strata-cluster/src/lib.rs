//! Cluster lifecycle orchestration
//!
//! This crate provides:
//! - `SpecDiffer`, which reports component version changes between two specs
//! - the validation gate run before every workflow
//! - `Bootstrapper` for the ephemeral kind cluster
//! - `ClusterManager` for applying, waiting on and moving CAPI objects
//! - `AddonInstaller` for GitOps bootstrap
//! - the Create, Upgrade and Delete workflows with their compensations

pub mod addons;
pub mod bootstrap;
pub mod differ;
pub mod manager;
pub mod validations;
pub mod workflow;

#[cfg(test)]
mod test_support;

pub use addons::{AddonInstaller, FluxAddonInstaller};
pub use bootstrap::{bootstrap_cluster_name, Bootstrapper, DeleteBootstrapOptions, KindBootstrapper};
pub use differ::SpecDiffer;
pub use manager::{ClusterManager, KubeClusterManager, Waits};
pub use workflow::{
    Create, CreateOptions, Delete, DeleteOptions, Dependencies, StepOutcome, TaskContext, Upgrade,
    Workflow,
};

#[cfg(test)]
pub use addons::MockAddonInstaller;
#[cfg(test)]
pub use bootstrap::MockBootstrapper;
#[cfg(test)]
pub use manager::MockClusterManager;
