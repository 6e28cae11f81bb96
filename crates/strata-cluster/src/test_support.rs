//! Mocks and fixtures shared by the crate's tests

use async_trait::async_trait;
use mockall::mock;

use strata_capi::{
    CapiClient, CapiClusterInfo, CapiSpecGenerator, ChangeDiffReporter, GeneratedManifests,
    InfrastructureBundle, InfrastructureBundleSource, KubeadmControlPlaneInfo, KubeconfigRewriter,
    MachineDeploymentInfo, MoveKind, Provider, ProviderValidator,
};
use strata_common::bundle::Bundles;
use strata_common::crd::{
    ControlPlaneConfiguration, Ref, StrataCluster, StrataClusterSpec, WorkerNodeGroupConfiguration,
};
use strata_common::{Cluster, ClusterSpec, ComponentChangeDiff, Result};

mock! {
    pub TestProvider {}

    #[async_trait]
    impl ProviderValidator for TestProvider {
        async fn setup_and_validate_create(&self, spec: &ClusterSpec) -> Result<()>;
        async fn setup_and_validate_upgrade(&self, spec: &ClusterSpec) -> Result<()>;
    }

    #[async_trait]
    impl CapiSpecGenerator for TestProvider {
        async fn generate_capi_spec_for_create(
            &self,
            bootstrap: &Cluster,
            spec: &ClusterSpec,
        ) -> Result<GeneratedManifests>;
        async fn generate_capi_spec_for_upgrade(
            &self,
            bootstrap: &Cluster,
            management: &Cluster,
            current: &ClusterSpec,
            new: &ClusterSpec,
        ) -> Result<GeneratedManifests>;
    }

    #[async_trait]
    impl KubeconfigRewriter for TestProvider {
        async fn update_kubeconfig(&self, content: &str, cluster_name: &str) -> Result<String>;
    }

    impl ChangeDiffReporter for TestProvider {
        fn change_diff(&self, current: &ClusterSpec, new: &ClusterSpec) -> Option<ComponentChangeDiff>;
    }

    impl InfrastructureBundleSource for TestProvider {
        fn get_infrastructure_bundle(&self, spec: &ClusterSpec) -> Option<InfrastructureBundle>;
    }

    impl Provider for TestProvider {
        fn name(&self) -> &'static str;
        fn clusterctl_infrastructure(&self, spec: &ClusterSpec) -> String;
        fn move_kinds(&self) -> Vec<MoveKind>;
    }
}

mock! {
    pub Capi {}

    #[async_trait]
    impl CapiClient for Capi {
        async fn get_capi_cluster(
            &self,
            target: &Cluster,
            name: &str,
            namespace: &str,
        ) -> Result<Option<CapiClusterInfo>>;
        async fn list_capi_clusters(
            &self,
            target: &Cluster,
            namespace: &str,
        ) -> Result<Vec<CapiClusterInfo>>;
        async fn get_kubeadm_control_plane(
            &self,
            target: &Cluster,
            cluster_name: &str,
            namespace: &str,
        ) -> Result<Option<KubeadmControlPlaneInfo>>;
        async fn get_machine_deployment(
            &self,
            target: &Cluster,
            name: &str,
            namespace: &str,
        ) -> Result<Option<MachineDeploymentInfo>>;
        async fn list_machine_deployments(
            &self,
            target: &Cluster,
            cluster_name: &str,
            namespace: &str,
        ) -> Result<Vec<MachineDeploymentInfo>>;
        async fn count_objects(
            &self,
            target: &Cluster,
            api_version: &str,
            kind: &str,
            cluster_name: &str,
            namespace: &str,
        ) -> Result<usize>;
        async fn get_kubeconfig_secret(
            &self,
            target: &Cluster,
            cluster_name: &str,
            namespace: &str,
        ) -> Result<Option<String>>;
        async fn delete_capi_cluster(&self, target: &Cluster, name: &str, namespace: &str)
            -> Result<()>;
    }
}

/// A one-node Docker cluster on Kubernetes 1.29
pub fn cluster_object(name: &str) -> StrataCluster {
    StrataCluster::new(
        name,
        StrataClusterSpec {
            kubernetes_version: "1.29".to_string(),
            control_plane_configuration: ControlPlaneConfiguration {
                count: 1,
                ..Default::default()
            },
            worker_node_group_configurations: vec![WorkerNodeGroupConfiguration {
                name: Some("md-0".to_string()),
                count: 1,
                machine_group_ref: None,
            }],
            datacenter_ref: Ref::new("DockerDatacenterConfig", name),
            ..Default::default()
        },
    )
}

/// Resolved spec for [`cluster_object`]
pub fn spec(name: &str) -> ClusterSpec {
    ClusterSpec::new(cluster_object(name), &Bundles::embedded().unwrap()).unwrap()
}

/// Spec of a cluster managed by `management`
pub fn managed_spec(name: &str, management: &str) -> ClusterSpec {
    let mut cluster = cluster_object(name);
    cluster.set_managed_by(management);
    ClusterSpec::new(cluster, &Bundles::embedded().unwrap())
        .unwrap()
        .with_management_cluster(Cluster::new(management, format!("/tmp/{}.kubeconfig", management)))
}

/// Observed CAPI cluster with the given control plane readiness
pub fn capi_cluster(name: &str, control_plane_ready: bool) -> CapiClusterInfo {
    CapiClusterInfo {
        name: name.to_string(),
        phase: Some("Provisioned".to_string()),
        control_plane_ready,
        infrastructure_ready: true,
    }
}

/// Provider mock with the passive calls every workflow makes stubbed out
pub fn quiet_provider() -> MockTestProvider {
    let mut provider = MockTestProvider::new();
    provider.expect_name().return_const("docker");
    provider
        .expect_clusterctl_infrastructure()
        .returning(|_| "docker:v1.6.4".to_string());
    provider.expect_change_diff().returning(|_, _| None);
    provider.expect_move_kinds().returning(Vec::new);
    provider
}
