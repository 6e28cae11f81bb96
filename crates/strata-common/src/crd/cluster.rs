//! StrataCluster Custom Resource Definition
//!
//! The StrataCluster CRD is the declarative description of a cluster: its
//! Kubernetes version, node topology, networking and the references to
//! infrastructure-specific configuration objects. It also declares which
//! cluster manages it. A cluster that names nobody (or itself) is
//! self-managed and hosts its own Cluster API controllers.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    multiset_eq, ClusterNetwork, ControlPlaneConfiguration, ExternalEtcdConfiguration,
    ManagementCluster, ProxyConfiguration, Ref, RegistryMirrorConfiguration,
    WorkerNodeGroupConfiguration,
};

/// Specification for a StrataCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "StrataCluster",
    plural = "strataclusters",
    shortname = "sc",
    namespaced,
    printcolumn = r#"{"name":"K8s","type":"string","jsonPath":".spec.kubernetesVersion"}"#,
    printcolumn = r#"{"name":"Managed By","type":"string","jsonPath":".spec.managementCluster.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StrataClusterSpec {
    /// Kubernetes minor version (e.g., "1.29")
    pub kubernetes_version: String,

    /// Control plane topology
    pub control_plane_configuration: ControlPlaneConfiguration,

    /// Worker node groups
    #[serde(default)]
    pub worker_node_group_configurations: Vec<WorkerNodeGroupConfiguration>,

    /// Infrastructure datacenter configuration
    pub datacenter_ref: Ref,

    /// Identity providers (OIDC, IAM authenticator)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identity_provider_refs: Vec<Ref>,

    /// GitOps configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ops_ref: Option<Ref>,

    /// Pod and service networking
    #[serde(default)]
    pub cluster_network: ClusterNetwork,

    /// Stacked etcd is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_etcd_configuration: Option<ExternalEtcdConfiguration>,

    /// HTTP proxy settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_configuration: Option<ProxyConfiguration>,

    /// Local registry mirror
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_mirror_configuration: Option<RegistryMirrorConfiguration>,

    /// Cluster that manages this one
    #[serde(default)]
    pub management_cluster: ManagementCluster,
}

impl StrataCluster {
    /// Cluster name from metadata, empty if unset
    pub fn cluster_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// All distinct machine config refs, in order of first occurrence.
    ///
    /// Collects from the control plane, then worker groups, then external
    /// etcd. Duplicate (kind, name) pairs collapse into one entry.
    pub fn machine_config_refs(&self) -> Vec<Ref> {
        let spec = &self.spec;
        let candidates = spec
            .control_plane_configuration
            .machine_group_ref
            .iter()
            .chain(
                spec.worker_node_group_configurations
                    .iter()
                    .filter_map(|w| w.machine_group_ref.as_ref()),
            )
            .chain(
                spec.external_etcd_configuration
                    .iter()
                    .filter_map(|e| e.machine_group_ref.as_ref()),
            );

        let mut refs: Vec<Ref> = Vec::new();
        for r in candidates {
            if !refs.contains(r) {
                refs.push(r.clone());
            }
        }
        refs
    }

    /// True when no other cluster manages this one
    pub fn is_self_managed(&self) -> bool {
        let mgmt = &self.spec.management_cluster.name;
        mgmt.is_empty() || mgmt == self.cluster_name()
    }

    /// Name of the managing cluster; the cluster's own name when self-managed
    pub fn managed_by(&self) -> &str {
        if self.is_self_managed() {
            self.cluster_name()
        } else {
            &self.spec.management_cluster.name
        }
    }

    /// Declare another cluster as this cluster's manager
    pub fn set_managed_by(&mut self, management_cluster: impl Into<String>) {
        self.spec.management_cluster.name = management_cluster.into();
    }

    /// Declare the cluster as managing itself
    pub fn set_self_managed(&mut self) {
        self.spec.management_cluster.name = self.cluster_name().to_string();
    }

    /// Compare management linkage.
    ///
    /// "Empty" and "self" are the same state; any external manager only
    /// equals the same external manager.
    pub fn management_cluster_equal(&self, other: &StrataCluster) -> bool {
        match (self.is_self_managed(), other.is_self_managed()) {
            (true, true) => true,
            (false, false) => self.spec.management_cluster == other.spec.management_cluster,
            _ => false,
        }
    }

    /// Desired-state equality used to decide whether an upgrade has work.
    ///
    /// Worker groups and identity-provider refs compare as order-independent
    /// multisets; everything else compares positionally.
    pub fn equal(&self, other: &StrataCluster) -> bool {
        let (a, b) = (&self.spec, &other.spec);
        a.kubernetes_version == b.kubernetes_version
            && a.control_plane_configuration == b.control_plane_configuration
            && multiset_eq(
                &a.worker_node_group_configurations,
                &b.worker_node_group_configurations,
            )
            && a.datacenter_ref == b.datacenter_ref
            && multiset_eq(&a.identity_provider_refs, &b.identity_provider_refs)
            && a.git_ops_ref == b.git_ops_ref
            && a.cluster_network == b.cluster_network
            && a.external_etcd_configuration == b.external_etcd_configuration
            && a.proxy_configuration == b.proxy_configuration
            && a.registry_mirror_configuration == b.registry_mirror_configuration
            && self.management_cluster_equal(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::types::{CidrBlocks, Endpoint};

    // =========================================================================
    // Test Fixtures
    // =========================================================================

    fn machine_ref(name: &str) -> Ref {
        Ref::new("DockerMachineConfig", name)
    }

    fn worker(name: &str, count: u32) -> WorkerNodeGroupConfiguration {
        WorkerNodeGroupConfiguration {
            name: None,
            count,
            machine_group_ref: Some(machine_ref(name)),
        }
    }

    fn sample_cluster(name: &str) -> StrataCluster {
        StrataCluster::new(
            name,
            StrataClusterSpec {
                kubernetes_version: "1.29".to_string(),
                control_plane_configuration: ControlPlaneConfiguration {
                    count: 1,
                    machine_group_ref: Some(machine_ref("cp")),
                    ..Default::default()
                },
                worker_node_group_configurations: vec![worker("md", 1)],
                datacenter_ref: Ref::new("DockerDatacenterConfig", name),
                cluster_network: ClusterNetwork {
                    pods: CidrBlocks {
                        cidr_blocks: vec!["192.168.0.0/16".to_string()],
                    },
                    services: CidrBlocks {
                        cidr_blocks: vec!["10.96.0.0/12".to_string()],
                    },
                },
                ..Default::default()
            },
        )
    }

    // =========================================================================
    // Machine config refs
    // =========================================================================

    #[test]
    fn machine_config_refs_deduplicates_in_first_seen_order() {
        let mut cluster = sample_cluster("test");
        cluster.spec.control_plane_configuration.machine_group_ref = Some(machine_ref("A"));
        cluster.spec.worker_node_group_configurations =
            vec![worker("B", 1), worker("B", 2), worker("C", 1)];
        cluster.spec.external_etcd_configuration = Some(ExternalEtcdConfiguration {
            count: 3,
            machine_group_ref: Some(machine_ref("A")),
        });

        let refs = cluster.machine_config_refs();
        assert_eq!(refs, vec![machine_ref("A"), machine_ref("B"), machine_ref("C")]);
    }

    #[test]
    fn machine_config_refs_distinguishes_kind() {
        let mut cluster = sample_cluster("test");
        cluster.spec.control_plane_configuration.machine_group_ref = Some(machine_ref("A"));
        cluster.spec.worker_node_group_configurations = vec![WorkerNodeGroupConfiguration {
            name: None,
            count: 1,
            machine_group_ref: Some(Ref::new("VSphereMachineConfig", "A")),
        }];

        assert_eq!(cluster.machine_config_refs().len(), 2);
    }

    #[test]
    fn machine_config_refs_skips_missing_refs() {
        let mut cluster = sample_cluster("test");
        cluster.spec.control_plane_configuration.machine_group_ref = None;
        cluster.spec.worker_node_group_configurations = vec![WorkerNodeGroupConfiguration {
            name: None,
            count: 1,
            machine_group_ref: None,
        }];

        assert!(cluster.machine_config_refs().is_empty());
    }

    // =========================================================================
    // Management linkage
    // =========================================================================

    #[test]
    fn empty_management_name_is_self_managed() {
        let cluster = sample_cluster("prod");
        assert!(cluster.is_self_managed());
        assert_eq!(cluster.managed_by(), "prod");
    }

    #[test]
    fn own_name_is_self_managed() {
        let mut cluster = sample_cluster("prod");
        cluster.set_self_managed();
        assert_eq!(cluster.spec.management_cluster.name, "prod");
        assert!(cluster.is_self_managed());
    }

    #[test]
    fn other_name_is_managed_by_that_cluster() {
        let mut cluster = sample_cluster("workload");
        cluster.set_managed_by("mgmt");
        assert!(!cluster.is_self_managed());
        assert_eq!(cluster.managed_by(), "mgmt");
    }

    #[test]
    fn empty_and_self_management_are_equal() {
        let empty = sample_cluster("prod");
        let mut own = sample_cluster("prod");
        own.set_self_managed();

        assert!(empty.management_cluster_equal(&own));
        assert!(own.management_cluster_equal(&empty));
        assert!(empty.equal(&own));
    }

    #[test]
    fn external_management_never_equals_self_managed() {
        let self_managed = sample_cluster("prod");
        let mut external = sample_cluster("prod");
        external.set_managed_by("mgmt");

        assert!(!self_managed.management_cluster_equal(&external));
        assert!(!external.management_cluster_equal(&self_managed));
        assert!(!external.equal(&self_managed));
    }

    #[test]
    fn different_external_managers_are_not_equal() {
        let mut a = sample_cluster("w");
        a.set_managed_by("mgmt-a");
        let mut b = sample_cluster("w");
        b.set_managed_by("mgmt-b");
        assert!(!a.management_cluster_equal(&b));

        b.set_managed_by("mgmt-a");
        assert!(a.management_cluster_equal(&b));
    }

    // =========================================================================
    // Spec equality
    // =========================================================================

    #[test]
    fn worker_groups_compare_as_set() {
        let mut a = sample_cluster("test");
        a.spec.worker_node_group_configurations = vec![worker("n1", 1), worker("n2", 2)];
        let mut b = sample_cluster("test");
        b.spec.worker_node_group_configurations = vec![worker("n2", 2), worker("n1", 1)];
        assert!(a.equal(&b));

        b.spec.worker_node_group_configurations = vec![worker("n2", 3), worker("n1", 1)];
        assert!(!a.equal(&b));

        b.spec.worker_node_group_configurations = vec![worker("n2", 2), worker("n3", 1)];
        assert!(!a.equal(&b));

        b.spec.worker_node_group_configurations = vec![worker("n2", 2)];
        assert!(!a.equal(&b));
    }

    #[test]
    fn renamed_worker_group_is_a_change() {
        let group = |name: &str| WorkerNodeGroupConfiguration {
            name: Some(name.to_string()),
            ..worker("workers", 3)
        };
        let mut a = sample_cluster("test");
        a.spec.worker_node_group_configurations = vec![group("md-0")];
        let mut b = sample_cluster("test");
        b.spec.worker_node_group_configurations = vec![group("md-1")];
        assert!(!a.equal(&b));

        b.spec.worker_node_group_configurations = vec![group("md-0")];
        assert!(a.equal(&b));
    }

    #[test]
    fn identity_provider_refs_compare_as_set() {
        let oidc = Ref::new("OIDCConfig", "oidc");
        let iam = Ref::new("AWSIamConfig", "iam");

        let mut a = sample_cluster("test");
        a.spec.identity_provider_refs = vec![oidc.clone(), iam.clone()];
        let mut b = sample_cluster("test");
        b.spec.identity_provider_refs = vec![iam.clone(), oidc.clone()];
        assert!(a.equal(&b));

        b.spec.identity_provider_refs = vec![iam.clone()];
        assert!(!a.equal(&b));

        b.spec.identity_provider_refs = vec![iam, Ref::new("OIDCConfig", "other")];
        assert!(!a.equal(&b));
    }

    #[test]
    fn cidr_block_changes_are_unequal() {
        let a = sample_cluster("test");
        let mut b = sample_cluster("test");
        b.spec.cluster_network.pods.cidr_blocks = vec!["10.10.0.0/16".to_string()];
        assert!(!a.equal(&b));
    }

    #[test]
    fn single_field_changes_break_equality() {
        let base = sample_cluster("test");

        let mut changed = base.clone();
        changed.spec.kubernetes_version = "1.30".to_string();
        assert!(!base.equal(&changed));

        let mut changed = base.clone();
        changed.spec.datacenter_ref.name = "other".to_string();
        assert!(!base.equal(&changed));

        let mut changed = base.clone();
        changed.spec.git_ops_ref = Some(Ref::new("GitOpsConfig", "flux"));
        assert!(!base.equal(&changed));

        let mut changed = base.clone();
        changed.spec.control_plane_configuration.endpoint = Some(Endpoint {
            host: "10.0.0.1".to_string(),
        });
        assert!(!base.equal(&changed));

        let mut changed = base.clone();
        changed.spec.external_etcd_configuration = Some(ExternalEtcdConfiguration {
            count: 3,
            machine_group_ref: Some(machine_ref("etcd")),
        });
        assert!(!base.equal(&changed));

        let mut changed = base.clone();
        changed.spec.proxy_configuration = Some(ProxyConfiguration {
            http_proxy: "http://proxy:3128".to_string(),
            ..Default::default()
        });
        assert!(!base.equal(&changed));

        let mut changed = base.clone();
        changed.spec.registry_mirror_configuration = Some(RegistryMirrorConfiguration {
            endpoint: "mirror.local".to_string(),
            ca_cert_content: String::new(),
        });
        assert!(!base.equal(&changed));
    }

    #[test]
    fn registry_mirror_ca_content_matters() {
        let mirror = RegistryMirrorConfiguration {
            endpoint: "mirror.local".to_string(),
            ca_cert_content: "ca-a".to_string(),
        };
        let mut a = sample_cluster("test");
        a.spec.registry_mirror_configuration = Some(mirror.clone());
        let mut b = sample_cluster("test");
        b.spec.registry_mirror_configuration = Some(RegistryMirrorConfiguration {
            ca_cert_content: "ca-b".to_string(),
            ..mirror
        });
        assert!(!a.equal(&b));
    }

    #[test]
    fn cluster_parses_from_yaml() {
        let yaml = r#"
apiVersion: strata.dev/v1alpha1
kind: StrataCluster
metadata:
  name: dev
spec:
  kubernetesVersion: "1.29"
  controlPlaneConfiguration:
    count: 1
    taints:
      - key: node-role
        effect: NoSchedule
  workerNodeGroupConfigurations:
    - count: 2
      machineGroupRef:
        kind: DockerMachineConfig
        name: dev
  datacenterRef:
    kind: DockerDatacenterConfig
    name: dev
  managementCluster:
    name: dev
"#;
        let cluster: StrataCluster = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cluster.cluster_name(), "dev");
        assert!(cluster.is_self_managed());
        assert_eq!(cluster.spec.control_plane_configuration.taints.len(), 1);
        assert_eq!(cluster.machine_config_refs(), vec![Ref::new("DockerMachineConfig", "dev")]);
    }
}
