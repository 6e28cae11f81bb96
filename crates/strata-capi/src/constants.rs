//! API versions, kinds and labels shared by the providers and the client

// =============================================================================
// API Versions
// =============================================================================

/// Core CAPI API version (Cluster, MachineDeployment, Machine)
pub const CAPI_API_VERSION: &str = "cluster.x-k8s.io/v1beta1";

/// Kubeadm control plane provider API version
pub const CONTROL_PLANE_API_VERSION: &str = "controlplane.cluster.x-k8s.io/v1beta1";

/// Kubeadm bootstrap provider API version
pub const BOOTSTRAP_API_VERSION: &str = "bootstrap.cluster.x-k8s.io/v1beta1";

/// Docker infrastructure API version
pub const DOCKER_INFRASTRUCTURE_API_VERSION: &str = "infrastructure.cluster.x-k8s.io/v1beta1";

// =============================================================================
// Kinds
// =============================================================================

/// CAPI Cluster kind
pub const KIND_CLUSTER: &str = "Cluster";
/// KubeadmControlPlane kind
pub const KIND_KUBEADM_CONTROL_PLANE: &str = "KubeadmControlPlane";
/// MachineDeployment kind
pub const KIND_MACHINE_DEPLOYMENT: &str = "MachineDeployment";
/// Machine kind
pub const KIND_MACHINE: &str = "Machine";
/// KubeadmConfigTemplate kind
pub const KIND_KUBEADM_CONFIG_TEMPLATE: &str = "KubeadmConfigTemplate";
/// DockerCluster kind
pub const KIND_DOCKER_CLUSTER: &str = "DockerCluster";
/// DockerMachineTemplate kind
pub const KIND_DOCKER_MACHINE_TEMPLATE: &str = "DockerMachineTemplate";
/// DockerMachine kind
pub const KIND_DOCKER_MACHINE: &str = "DockerMachine";

// =============================================================================
// Labels and defaults
// =============================================================================

/// Label CAPI uses to associate objects with a cluster
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Standard managed-by label
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of the managed-by label on generated objects
pub const MANAGED_BY_VALUE: &str = "strata";

/// Pod CIDR used when the cluster network leaves it empty
pub const DEFAULT_POD_CIDR: &str = "192.168.0.0/16";

/// Service CIDR used when the cluster network leaves it empty
pub const DEFAULT_SERVICE_CIDR: &str = "10.128.0.0/12";

/// Kubernetes API server port inside the node
pub const KUBERNETES_API_SERVER_PORT: u16 = 6443;

/// Name of the KubeadmControlPlane generated for a cluster
pub fn control_plane_name(cluster_name: &str) -> String {
    format!("{}-control-plane", cluster_name)
}

/// Key holding the kubeconfig in CAPI's kubeconfig secret
pub const KUBECONFIG_SECRET_KEY: &str = "value";

/// Name of the secret CAPI writes a cluster's admin kubeconfig to
pub fn kubeconfig_secret_name(cluster_name: &str) -> String {
    format!("{}-kubeconfig", cluster_name)
}

/// Name of the load balancer container CAPD runs for a cluster
pub fn load_balancer_container(cluster_name: &str) -> String {
    format!("{}-lb", cluster_name)
}
