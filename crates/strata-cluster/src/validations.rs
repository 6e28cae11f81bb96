//! Validation gate
//!
//! Preconditions checked before any mutating task of a workflow runs. Every
//! failure here is an [`Error::Validation`], so workflows stop without
//! compensation.

use strata_common::{
    Cluster, ClusterSpec, Error, FeatureFlags, Result, CAPI_CLUSTERS_CRD, STRATA_CLUSTERS_CRD,
};
use tracing::debug;

use strata_capi::CapiClusterInfo;

use crate::manager::ClusterManager;

/// Reject a name already taken by a CAPI cluster on `management`
pub async fn validate_cluster_name_unique(
    manager: &dyn ClusterManager,
    management: &Cluster,
    cluster_name: &str,
) -> Result<()> {
    let clusters = manager.list_capi_clusters(management).await?;
    if clusters.iter().any(|c| c.name == cluster_name) {
        return Err(Error::validation_for(
            cluster_name,
            format!("cluster name {} already exists", cluster_name),
        ));
    }
    Ok(())
}

/// Require the CAPI and Strata CRDs on a management cluster
pub async fn validate_management_cluster(
    manager: &dyn ClusterManager,
    management: &Cluster,
    cluster_name: &str,
) -> Result<()> {
    for crd in [CAPI_CLUSTERS_CRD, STRATA_CLUSTERS_CRD] {
        if !manager.crd_exists(management, crd).await? {
            return Err(Error::validation_for(
                cluster_name,
                format!("{} is not a management cluster: CRD {} not found", management, crd),
            ));
        }
    }
    Ok(())
}

/// Require the CAPI cluster object of a workload cluster to be present
pub async fn validate_cluster_object_exists(
    manager: &dyn ClusterManager,
    cluster: &Cluster,
    cluster_name: &str,
) -> Result<()> {
    let clusters = manager.list_capi_clusters(cluster).await?;
    validate_cluster_object_listed(&clusters, cluster, cluster_name)
}

/// Require `cluster_name` among the CAPI clusters listed on `cluster`
pub fn validate_cluster_object_listed(
    clusters: &[CapiClusterInfo],
    cluster: &Cluster,
    cluster_name: &str,
) -> Result<()> {
    if clusters.is_empty() {
        return Err(Error::validation_for(
            cluster_name,
            format!("no CAPI cluster objects present on workload cluster {}", cluster),
        ));
    }
    if !clusters.iter().any(|c| c.name == cluster_name) {
        return Err(Error::validation_for(
            cluster_name,
            format!("couldn't find CAPI cluster object for cluster with name {}", cluster_name),
        ));
    }
    Ok(())
}

/// Reject deleting a cluster whose CAPI namespace still holds other clusters.
///
/// Those clusters are managed from it and would lose their management
/// plane with it.
pub fn validate_no_managed_clusters(clusters: &[CapiClusterInfo], cluster_name: &str) -> Result<()> {
    let managed: Vec<&str> = clusters
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| *name != cluster_name)
        .collect();
    if managed.is_empty() {
        return Ok(());
    }
    Err(Error::validation_for(
        cluster_name,
        format!(
            "cluster {} still manages workload clusters {}; delete them first",
            cluster_name,
            managed.join(", ")
        ),
    ))
}

/// Reject control plane taints unless the taints feature is active
pub fn validate_taints_support(spec: &ClusterSpec, features: &FeatureFlags) -> Result<()> {
    spec.validate_taints_support(features)
}

/// Reject upgrades that change fields fixed at creation
pub fn validate_immutable_fields(current: &ClusterSpec, new: &ClusterSpec) -> Result<()> {
    if !current.cluster.management_cluster_equal(&new.cluster) {
        return Err(Error::validation_for_field(
            new.name(),
            "spec.managementCluster",
            "management cluster is immutable",
        ));
    }
    let (old_kind, new_kind) = (
        &current.cluster.spec.datacenter_ref.kind,
        &new.cluster.spec.datacenter_ref.kind,
    );
    if old_kind != new_kind {
        return Err(Error::validation_for_field(
            new.name(),
            "spec.datacenterRef.kind",
            format!("datacenter kind is immutable ({} -> {})", old_kind, new_kind),
        ));
    }
    Ok(())
}

/// The management cluster a managed spec names, or a validation error
pub fn require_management_cluster(spec: &ClusterSpec) -> Result<&Cluster> {
    spec.management_cluster.as_ref().ok_or_else(|| {
        Error::validation_for_field(
            spec.name(),
            "spec.managementCluster",
            format!(
                "cluster is managed by {} but no management kubeconfig was provided",
                spec.cluster.managed_by()
            ),
        )
    })
}

/// Gate run before Create
pub async fn validate_create(
    manager: &dyn ClusterManager,
    spec: &ClusterSpec,
    features: &FeatureFlags,
) -> Result<()> {
    validate_taints_support(spec, features)?;
    if !spec.cluster.is_self_managed() {
        let management = require_management_cluster(spec)?;
        validate_management_cluster(manager, management, spec.name()).await?;
        validate_cluster_name_unique(manager, management, spec.name()).await?;
    }
    debug!(cluster = %spec.name(), "create validations passed");
    Ok(())
}

/// Gate run before Upgrade, against the cluster holding the CAPI objects
pub async fn validate_upgrade(
    manager: &dyn ClusterManager,
    management: &Cluster,
    spec: &ClusterSpec,
    features: &FeatureFlags,
) -> Result<()> {
    validate_taints_support(spec, features)?;
    if !spec.cluster.is_self_managed() {
        validate_management_cluster(manager, management, spec.name()).await?;
    }
    validate_cluster_object_exists(manager, management, spec.name()).await?;
    debug!(cluster = %spec.name(), "upgrade validations passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::MockClusterManager;
    use crate::test_support::{capi_cluster, managed_spec, spec};
    use strata_common::crd::{Ref, Taint, TaintEffect};
    use strata_common::features::{taints_support, TAINTS_SUPPORT};

    fn mgmt() -> Cluster {
        Cluster::new("mgmt", "/tmp/mgmt.kubeconfig")
    }

    fn flags_without_taints() -> FeatureFlags {
        let flags = FeatureFlags::new();
        flags.store(TAINTS_SUPPORT, false);
        flags
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let mut manager = MockClusterManager::new();
        manager
            .expect_list_capi_clusters()
            .returning(|_| Ok(vec![capi_cluster("dev", true)]));

        let err = validate_cluster_name_unique(&manager, &mgmt(), "dev").await.unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("cluster name dev already exists"));
        assert!(validate_cluster_name_unique(&manager, &mgmt(), "prod").await.is_ok());
    }

    #[test]
    fn management_cluster_with_workloads_cannot_be_deleted() {
        let listed = vec![capi_cluster("dev", true), capi_cluster("wl1", true), capi_cluster("wl2", false)];
        let err = validate_no_managed_clusters(&listed, "dev").unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("still manages workload clusters wl1, wl2"));

        assert!(validate_no_managed_clusters(&[capi_cluster("dev", true)], "dev").is_ok());
    }

    #[tokio::test]
    async fn management_cluster_needs_both_crds() {
        let mut manager = MockClusterManager::new();
        manager
            .expect_crd_exists()
            .returning(|_, crd| Ok(crd == CAPI_CLUSTERS_CRD));

        let err = validate_management_cluster(&manager, &mgmt(), "dev").await.unwrap_err();
        assert!(err.to_string().contains(STRATA_CLUSTERS_CRD));
    }

    #[tokio::test]
    async fn cluster_object_checks_distinguish_empty_and_missing() {
        let mut empty = MockClusterManager::new();
        empty.expect_list_capi_clusters().returning(|_| Ok(Vec::new()));
        let err = validate_cluster_object_exists(&empty, &mgmt(), "dev").await.unwrap_err();
        assert!(err.to_string().contains("no CAPI cluster objects present on workload cluster mgmt"));

        let mut other = MockClusterManager::new();
        other
            .expect_list_capi_clusters()
            .returning(|_| Ok(vec![capi_cluster("prod", true)]));
        let err = validate_cluster_object_exists(&other, &mgmt(), "dev").await.unwrap_err();
        assert!(err
            .to_string()
            .contains("couldn't find CAPI cluster object for cluster with name dev"));
    }

    #[test]
    fn immutable_fields_reject_management_change() {
        let current = spec("dev");
        let new = managed_spec("dev", "mgmt");
        let err = validate_immutable_fields(&current, &new).unwrap_err();
        assert!(err.to_string().contains("management cluster is immutable"));
    }

    #[test]
    fn immutable_fields_reject_datacenter_kind_change() {
        let current = spec("dev");
        let mut new = spec("dev");
        new.cluster.spec.datacenter_ref = Ref::new("VSphereDatacenterConfig", "dev");
        assert!(validate_immutable_fields(&current, &new).is_err());

        let mut renamed = spec("dev");
        renamed.cluster.spec.datacenter_ref = Ref::new("DockerDatacenterConfig", "other");
        assert!(validate_immutable_fields(&current, &renamed).is_ok());
    }

    #[tokio::test]
    async fn create_gate_checks_taints_before_touching_clusters() {
        let mut tainted = spec("dev");
        tainted.cluster.spec.control_plane_configuration.taints = vec![Taint {
            key: "dedicated".to_string(),
            value: None,
            effect: TaintEffect::NoSchedule,
        }];
        let manager = MockClusterManager::new();
        let flags = flags_without_taints();

        let err = validate_create(&manager, &tainted, &flags).await.unwrap_err();
        assert!(err.to_string().contains("Taints feature is not enabled."));

        flags.enable(&taints_support());
        assert!(validate_create(&manager, &tainted, &flags).await.is_ok());
    }

    #[tokio::test]
    async fn managed_create_requires_management_kubeconfig() {
        let mut spec = managed_spec("dev", "mgmt");
        spec.management_cluster = None;
        let err = validate_create(&MockClusterManager::new(), &spec, &flags_without_taints())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("managed by mgmt"));
    }

    #[tokio::test]
    async fn managed_create_validates_against_management() {
        let mut manager = MockClusterManager::new();
        manager
            .expect_crd_exists()
            .withf(|cluster, _| cluster.name == "mgmt")
            .times(2)
            .returning(|_, _| Ok(true));
        manager
            .expect_list_capi_clusters()
            .times(1)
            .returning(|_| Ok(vec![capi_cluster("other", true)]));

        validate_create(&manager, &managed_spec("dev", "mgmt"), &flags_without_taints())
            .await
            .unwrap();
    }
}
