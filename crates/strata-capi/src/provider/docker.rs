//! Docker (CAPD) provider
//!
//! Generates CAPD manifests for local development clusters. Nodes run as
//! containers from the bundle's kind node image and the API server is
//! reached through the host port CAPD maps on the cluster's load balancer
//! container.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use strata_common::crd::{Taint, WorkerNodeGroupConfiguration};
use strata_common::features::taints_support;
use strata_common::kubeconfig::rewrite_for_loopback;
use strata_common::process::run_command;
use strata_common::{
    Cluster, ClusterSpec, ComponentChangeDiff, Error, FeatureFlags, Result,
    STRATA_SYSTEM_NAMESPACE,
};

use super::{
    CapiSpecGenerator, ChangeDiffReporter, GeneratedManifests, InfrastructureBundle,
    InfrastructureBundleSource, KubeconfigRewriter, MoveKind, Provider, ProviderValidator,
};
use crate::client::CapiClient;
use crate::constants::{
    control_plane_name, load_balancer_container, BOOTSTRAP_API_VERSION, CAPI_API_VERSION,
    CONTROL_PLANE_API_VERSION, DEFAULT_POD_CIDR, DEFAULT_SERVICE_CIDR,
    DOCKER_INFRASTRUCTURE_API_VERSION, KIND_CLUSTER, KIND_DOCKER_CLUSTER, KIND_DOCKER_MACHINE,
    KIND_DOCKER_MACHINE_TEMPLATE, KIND_KUBEADM_CONFIG_TEMPLATE, KIND_KUBEADM_CONTROL_PLANE,
    KIND_MACHINE_DEPLOYMENT, KUBERNETES_API_SERVER_PORT,
};
use crate::manifest::{create_cluster_labels, render_documents, CAPIManifest};

const PROVIDER_NAME: &str = "docker";

const CRI_SOCKET: &str = "/var/run/containerd/containerd.sock";
const EVICTION_HARD: &str = "nodefs.available<0%,nodefs.inodesFree<0%,imagefs.available<0%";
const DOCKER_SOCKET: &str = "/var/run/docker.sock";
const DOCKER_PORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of the current time, used to stamp new template names
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Access to the local Docker daemon
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DockerClient: Send + Sync {
    /// Host port mapped to the API server port of a cluster's load balancer
    async fn get_lb_port(&self, cluster_name: &str) -> Result<String>;
}

/// `DockerClient` backed by the docker CLI
#[derive(Clone, Debug, Default)]
pub struct DockerCli;

impl DockerCli {
    /// Create a client using the `docker` binary on PATH
    pub fn new() -> Self {
        Self
    }
}

/// Extract the port from `docker port` output such as `0.0.0.0:4332`
fn parse_port(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.rsplit(':').next())
        .filter(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

#[async_trait]
impl DockerClient for DockerCli {
    async fn get_lb_port(&self, cluster_name: &str) -> Result<String> {
        let container = load_balancer_container(cluster_name);
        let mut cmd = Command::new("docker");
        cmd.arg("port")
            .arg(&container)
            .arg(format!("{}/tcp", KUBERNETES_API_SERVER_PORT));
        let stdout = run_command(&mut cmd, &format!("docker port {}", container), DOCKER_PORT_TIMEOUT)
            .await
            .map_err(|e| Error::execution(cluster_name, "docker port", e))?;

        parse_port(&stdout).ok_or_else(|| {
            Error::provider_for(
                cluster_name,
                PROVIDER_NAME,
                format!("no port mapped for {} in {:?}", container, stdout.trim()),
            )
        })
    }
}

/// Template names used for one generation pass
#[derive(Clone, Debug, PartialEq, Eq)]
struct TemplateNames {
    control_plane: String,
    /// Keyed by worker group name
    workers: BTreeMap<String, String>,
}

/// Worker group name, `md-<index>` for unnamed groups
fn worker_group_name(index: usize, group: &WorkerNodeGroupConfiguration) -> String {
    group.name.clone().unwrap_or_else(|| format!("md-{}", index))
}

fn machine_deployment_name(cluster_name: &str, group_name: &str) -> String {
    format!("{}-{}", cluster_name, group_name)
}

/// True when the control plane machine template must be replaced
fn needs_new_control_plane_template(
    current: &ClusterSpec,
    new: &ClusterSpec,
    taints_enabled: bool,
) -> bool {
    let (cur, next) = (
        &current.cluster.spec.control_plane_configuration,
        &new.cluster.spec.control_plane_configuration,
    );
    if current.bundles_number != new.bundles_number
        || current.cluster.spec.kubernetes_version != new.cluster.spec.kubernetes_version
        || current.versions_bundle.kind_node.uri != new.versions_bundle.kind_node.uri
        || cur.machine_group_ref != next.machine_group_ref
    {
        return true;
    }
    taints_enabled && !taints_equal(&cur.taints, &next.taints)
}

/// True when a worker group's machine template must be replaced
fn needs_new_worker_template(
    current: &ClusterSpec,
    new: &ClusterSpec,
    current_group: &WorkerNodeGroupConfiguration,
    new_group: &WorkerNodeGroupConfiguration,
) -> bool {
    current.bundles_number != new.bundles_number
        || current.cluster.spec.kubernetes_version != new.cluster.spec.kubernetes_version
        || current.versions_bundle.kind_node.uri != new.versions_bundle.kind_node.uri
        || current_group.machine_group_ref != new_group.machine_group_ref
}

fn taints_equal(a: &[Taint], b: &[Taint]) -> bool {
    let (mut a, mut b) = (a.to_vec(), b.to_vec());
    a.sort();
    b.sort();
    a == b
}

/// CAPD provider
pub struct DockerProvider {
    docker: Arc<dyn DockerClient>,
    capi: Arc<dyn CapiClient>,
    features: Arc<FeatureFlags>,
    clock: Clock,
    namespace: String,
}

impl DockerProvider {
    /// Create a provider writing objects to the Strata system namespace
    pub fn new(
        docker: Arc<dyn DockerClient>,
        capi: Arc<dyn CapiClient>,
        features: Arc<FeatureFlags>,
    ) -> Self {
        Self {
            docker,
            capi,
            features,
            clock: Arc::new(Utc::now),
            namespace: STRATA_SYSTEM_NAMESPACE.to_string(),
        }
    }

    /// Replace the clock used to stamp new template names
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn validate(&self, spec: &ClusterSpec) -> Result<()> {
        let name = spec.name();
        if spec.cluster.spec.control_plane_configuration.endpoint.is_some() {
            return Err(Error::validation_for_field(
                name,
                "spec.controlPlaneConfiguration.endpoint",
                "specifying endpoint host configuration in Cluster is not supported",
            ));
        }
        if spec.cluster.spec.external_etcd_configuration.is_some() {
            return Err(Error::validation_for_field(
                name,
                "spec.externalEtcdConfiguration",
                "external etcd is not supported by the docker provider",
            ));
        }
        spec.validate_taints_support(&self.features)
    }

    fn stamp(&self) -> i64 {
        (self.clock)().timestamp_millis()
    }

    fn fresh_names(&self, spec: &ClusterSpec, stamp: i64) -> TemplateNames {
        let name = spec.name();
        TemplateNames {
            control_plane: format!("{}-control-plane-template-{}", name, stamp),
            workers: spec
                .cluster
                .spec
                .worker_node_group_configurations
                .iter()
                .enumerate()
                .map(|(i, group)| {
                    let group_name = worker_group_name(i, group);
                    let template = format!("{}-{}-template-{}", name, group_name, stamp);
                    (group_name, template)
                })
                .collect(),
        }
    }

    async fn live_control_plane_template(&self, management: &Cluster, cluster_name: &str) -> Result<Option<String>> {
        Ok(self
            .capi
            .get_kubeadm_control_plane(management, cluster_name, &self.namespace)
            .await?
            .and_then(|kcp| kcp.infrastructure_template_name))
    }

    async fn live_worker_template(&self, management: &Cluster, deployment: &str) -> Result<Option<String>> {
        Ok(self
            .capi
            .get_machine_deployment(management, deployment, &self.namespace)
            .await?
            .and_then(|md| md.infrastructure_template_name))
    }

    fn render(&self, spec: &ClusterSpec, names: &TemplateNames) -> Result<GeneratedManifests> {
        let control_plane = render_documents(&self.control_plane_manifests(spec, &names.control_plane)?)?;
        let workers = render_documents(&self.worker_manifests(spec, names)?)?;
        Ok(GeneratedManifests {
            control_plane,
            workers,
        })
    }

    fn manifest(&self, api_version: &str, kind: &str, name: &str, cluster_name: &str) -> CAPIManifest {
        CAPIManifest::new(api_version, kind, name, &self.namespace)
            .with_labels(create_cluster_labels(cluster_name))
    }

    fn machine_template(&self, spec: &ClusterSpec, template_name: &str) -> CAPIManifest {
        self.manifest(
            DOCKER_INFRASTRUCTURE_API_VERSION,
            KIND_DOCKER_MACHINE_TEMPLATE,
            template_name,
            spec.name(),
        )
        .with_spec(json!({
            "template": {
                "spec": {
                    "customImage": spec.versions_bundle.kind_node.uri,
                    "extraMounts": [{"containerPath": DOCKER_SOCKET, "hostPath": DOCKER_SOCKET}]
                }
            }
        }))
    }

    fn control_plane_manifests(&self, spec: &ClusterSpec, template_name: &str) -> Result<Vec<CAPIManifest>> {
        let name = spec.name();
        let cp_name = control_plane_name(name);
        let network = &spec.cluster.spec.cluster_network;
        let distro = &spec.versions_bundle.kube_distro;

        let cidrs = |blocks: &[String], default: &str| -> Vec<String> {
            if blocks.is_empty() {
                vec![default.to_string()]
            } else {
                blocks.to_vec()
            }
        };

        let cluster = self.manifest(CAPI_API_VERSION, KIND_CLUSTER, name, name).with_spec(json!({
            "clusterNetwork": {
                "pods": {"cidrBlocks": cidrs(&network.pods.cidr_blocks, DEFAULT_POD_CIDR)},
                "services": {"cidrBlocks": cidrs(&network.services.cidr_blocks, DEFAULT_SERVICE_CIDR)},
                "serviceDomain": "cluster.local"
            },
            "controlPlaneRef": {
                "apiVersion": CONTROL_PLANE_API_VERSION,
                "kind": KIND_KUBEADM_CONTROL_PLANE,
                "name": cp_name
            },
            "infrastructureRef": {
                "apiVersion": DOCKER_INFRASTRUCTURE_API_VERSION,
                "kind": KIND_DOCKER_CLUSTER,
                "name": name
            }
        }));

        let docker_cluster = self
            .manifest(DOCKER_INFRASTRUCTURE_API_VERSION, KIND_DOCKER_CLUSTER, name, name)
            .with_spec(json!({}));

        let taints = spec.control_plane_taints();
        let registration = node_registration(if taints.is_empty() { None } else { Some(taints) })?;

        let control_plane = self
            .manifest(CONTROL_PLANE_API_VERSION, KIND_KUBEADM_CONTROL_PLANE, &cp_name, name)
            .with_spec(json!({
                "replicas": spec.cluster.spec.control_plane_configuration.count,
                "version": spec.kubernetes_version_tag(),
                "machineTemplate": {
                    "infrastructureRef": {
                        "apiVersion": DOCKER_INFRASTRUCTURE_API_VERSION,
                        "kind": KIND_DOCKER_MACHINE_TEMPLATE,
                        "name": template_name
                    }
                },
                "kubeadmConfigSpec": {
                    "clusterConfiguration": {
                        "imageRepository": distro.kubernetes.repository,
                        "etcd": {"local": {
                            "imageRepository": distro.etcd.repository,
                            "imageTag": distro.etcd.tag
                        }},
                        "dns": {
                            "imageRepository": distro.core_dns.repository,
                            "imageTag": distro.core_dns.tag
                        },
                        "apiServer": {"certSANs": ["localhost", "127.0.0.1"]},
                        "controllerManager": {"extraArgs": {"enable-hostpath-provisioner": "true"}}
                    },
                    "initConfiguration": {"nodeRegistration": registration.clone()},
                    "joinConfiguration": {"nodeRegistration": registration}
                }
            }));

        Ok(vec![
            cluster,
            docker_cluster,
            self.machine_template(spec, template_name),
            control_plane,
        ])
    }

    fn worker_manifests(&self, spec: &ClusterSpec, names: &TemplateNames) -> Result<Vec<CAPIManifest>> {
        let name = spec.name();
        let mut manifests = Vec::new();

        for (index, group) in spec.cluster.spec.worker_node_group_configurations.iter().enumerate() {
            let group_name = worker_group_name(index, group);
            let deployment = machine_deployment_name(name, &group_name);
            let template_name = names.workers.get(&group_name).ok_or_else(|| {
                Error::internal_with_context(
                    "docker_provider",
                    format!("no template name for worker group {}", group_name),
                )
            })?;

            let config_template = self
                .manifest(BOOTSTRAP_API_VERSION, KIND_KUBEADM_CONFIG_TEMPLATE, &deployment, name)
                .with_spec(json!({
                    "template": {"spec": {"joinConfiguration": {"nodeRegistration": node_registration(None)?}}}
                }));

            let machine_deployment = self
                .manifest(CAPI_API_VERSION, KIND_MACHINE_DEPLOYMENT, &deployment, name)
                .with_spec(json!({
                    "clusterName": name,
                    "replicas": group.count,
                    "selector": {"matchLabels": {}},
                    "template": {"spec": {
                        "clusterName": name,
                        "version": spec.kubernetes_version_tag(),
                        "bootstrap": {"configRef": {
                            "apiVersion": BOOTSTRAP_API_VERSION,
                            "kind": KIND_KUBEADM_CONFIG_TEMPLATE,
                            "name": deployment
                        }},
                        "infrastructureRef": {
                            "apiVersion": DOCKER_INFRASTRUCTURE_API_VERSION,
                            "kind": KIND_DOCKER_MACHINE_TEMPLATE,
                            "name": template_name
                        }
                    }}
                }));

            manifests.push(config_template);
            manifests.push(self.machine_template(spec, template_name));
            manifests.push(machine_deployment);
        }

        Ok(manifests)
    }
}

/// kubeadm node registration, with taints when given
fn node_registration(taints: Option<&[Taint]>) -> Result<Value> {
    let mut registration = json!({
        "criSocket": CRI_SOCKET,
        "kubeletExtraArgs": {
            "cgroup-driver": "cgroupfs",
            "eviction-hard": EVICTION_HARD
        }
    });
    if let Some(taints) = taints {
        registration["taints"] = serde_json::to_value(taints)?;
    }
    Ok(registration)
}

#[async_trait]
impl ProviderValidator for DockerProvider {
    async fn setup_and_validate_create(&self, spec: &ClusterSpec) -> Result<()> {
        self.validate(spec)?;
        debug!(cluster = %spec.name(), "docker provider validated create");
        Ok(())
    }

    async fn setup_and_validate_upgrade(&self, spec: &ClusterSpec) -> Result<()> {
        self.validate(spec)?;
        debug!(cluster = %spec.name(), "docker provider validated upgrade");
        Ok(())
    }
}

#[async_trait]
impl CapiSpecGenerator for DockerProvider {
    async fn generate_capi_spec_for_create(
        &self,
        _bootstrap: &Cluster,
        spec: &ClusterSpec,
    ) -> Result<GeneratedManifests> {
        self.validate(spec)?;
        let names = self.fresh_names(spec, self.stamp());
        info!(cluster = %spec.name(), control_plane_template = %names.control_plane, "generating CAPI manifests");
        self.render(spec, &names)
    }

    async fn generate_capi_spec_for_upgrade(
        &self,
        _bootstrap: &Cluster,
        management: &Cluster,
        current: &ClusterSpec,
        new: &ClusterSpec,
    ) -> Result<GeneratedManifests> {
        self.validate(new)?;
        let name = new.name();
        let mut names = self.fresh_names(new, self.stamp());
        let taints_enabled = self.features.is_active(&taints_support());

        if !needs_new_control_plane_template(current, new, taints_enabled) {
            match self.live_control_plane_template(management, name).await? {
                Some(existing) => names.control_plane = existing,
                None => warn!(cluster = %name, "no live control plane template found, using a new one"),
            }
        }

        let current_groups: BTreeMap<String, &WorkerNodeGroupConfiguration> = current
            .cluster
            .spec
            .worker_node_group_configurations
            .iter()
            .enumerate()
            .map(|(i, group)| (worker_group_name(i, group), group))
            .collect();

        for (index, group) in new.cluster.spec.worker_node_group_configurations.iter().enumerate() {
            let group_name = worker_group_name(index, group);
            let Some(current_group) = current_groups.get(&group_name) else {
                continue;
            };
            if needs_new_worker_template(current, new, current_group, group) {
                continue;
            }
            let deployment = machine_deployment_name(name, &group_name);
            match self.live_worker_template(management, &deployment).await? {
                Some(existing) => {
                    names.workers.insert(group_name, existing);
                }
                None => warn!(cluster = %name, deployment = %deployment, "no live worker template found, using a new one"),
            }
        }

        info!(cluster = %name, control_plane_template = %names.control_plane, "generating CAPI upgrade manifests");
        self.render(new, &names)
    }
}

#[async_trait]
impl KubeconfigRewriter for DockerProvider {
    async fn update_kubeconfig(&self, content: &str, cluster_name: &str) -> Result<String> {
        let port = self.docker.get_lb_port(cluster_name).await?;
        debug!(cluster = %cluster_name, port = %port, "rewriting kubeconfig for loopback access");
        rewrite_for_loopback(content, &port)
    }
}

impl ChangeDiffReporter for DockerProvider {
    fn change_diff(&self, current: &ClusterSpec, new: &ClusterSpec) -> Option<ComponentChangeDiff> {
        ComponentChangeDiff::between(
            PROVIDER_NAME,
            &current.versions_bundle.docker.version,
            &new.versions_bundle.docker.version,
        )
    }
}

impl InfrastructureBundleSource for DockerProvider {
    fn get_infrastructure_bundle(&self, spec: &ClusterSpec) -> Option<InfrastructureBundle> {
        let docker = &spec.versions_bundle.docker;
        Some(InfrastructureBundle {
            folder_name: format!("infrastructure-docker/{}/", docker.version),
            manifests: vec![
                docker.components.clone(),
                docker.metadata.clone(),
                docker.cluster_template.clone(),
            ],
        })
    }
}

impl Provider for DockerProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn clusterctl_infrastructure(&self, spec: &ClusterSpec) -> String {
        format!("{}:{}", PROVIDER_NAME, spec.versions_bundle.docker.version)
    }

    fn move_kinds(&self) -> Vec<MoveKind> {
        vec![
            MoveKind::new(DOCKER_INFRASTRUCTURE_API_VERSION, KIND_DOCKER_CLUSTER),
            MoveKind::new(DOCKER_INFRASTRUCTURE_API_VERSION, KIND_DOCKER_MACHINE_TEMPLATE),
            MoveKind::new(DOCKER_INFRASTRUCTURE_API_VERSION, KIND_DOCKER_MACHINE),
        ]
    }
}
