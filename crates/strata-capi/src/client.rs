//! Read access to live CAPI objects
//!
//! Provides a trait-based abstraction so providers and the cluster manager
//! can be tested without an API server, while production code reads through
//! `DynamicObject` APIs built per target cluster.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams};
use serde_json::Value;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use strata_common::kube_utils::{build_api_resource, create_client, get_secret_data};
use strata_common::{Cluster, Error, Result};

use crate::constants::{
    control_plane_name, kubeconfig_secret_name, KUBECONFIG_SECRET_KEY, CAPI_API_VERSION, CLUSTER_NAME_LABEL, CONTROL_PLANE_API_VERSION,
    KIND_CLUSTER, KIND_KUBEADM_CONTROL_PLANE, KIND_MACHINE_DEPLOYMENT,
};

/// Summary of a CAPI `Cluster` object
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapiClusterInfo {
    /// Object name
    pub name: String,
    /// `status.phase`
    pub phase: Option<String>,
    /// Control plane reported ready
    pub control_plane_ready: bool,
    /// Infrastructure reported ready
    pub infrastructure_ready: bool,
}

/// Summary of a `KubeadmControlPlane`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KubeadmControlPlaneInfo {
    /// Object name
    pub name: String,
    /// Name of the machine template the control plane references
    pub infrastructure_template_name: Option<String>,
    /// Desired Kubernetes version (`spec.version`)
    pub version: Option<String>,
    /// Lowest version running across control plane machines (`status.version`)
    pub observed_version: Option<String>,
    /// Desired replica count
    pub desired_replicas: i64,
    /// Machines owned by the control plane
    pub replicas: i64,
    /// Machines at the desired spec
    pub updated_replicas: i64,
    /// Machines ready
    pub ready_replicas: i64,
}

impl KubeadmControlPlaneInfo {
    /// True when every machine runs `version` and all are updated
    pub fn is_converged(&self, version: &str) -> bool {
        self.observed_version.as_deref() == Some(version)
            && self.replicas > 0
            && self.updated_replicas == self.replicas
            && self.replicas == self.desired_replicas
    }

    fn from_object(obj: &DynamicObject) -> Self {
        let data = &obj.data;
        Self {
            name: obj.metadata.name.clone().unwrap_or_default(),
            infrastructure_template_name: str_at(data, "/spec/machineTemplate/infrastructureRef/name"),
            version: str_at(data, "/spec/version"),
            observed_version: str_at(data, "/status/version"),
            desired_replicas: int_at(data, "/spec/replicas"),
            replicas: int_at(data, "/status/replicas"),
            updated_replicas: int_at(data, "/status/updatedReplicas"),
            ready_replicas: int_at(data, "/status/readyReplicas"),
        }
    }
}

/// Summary of a `MachineDeployment`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MachineDeploymentInfo {
    /// Object name
    pub name: String,
    /// Name of the machine template the deployment references
    pub infrastructure_template_name: Option<String>,
    /// Desired Kubernetes version (`spec.template.spec.version`)
    pub version: Option<String>,
    /// Desired replica count
    pub desired_replicas: i64,
    /// Machines owned by the deployment
    pub replicas: i64,
    /// Machines at the desired spec
    pub updated_replicas: i64,
    /// Machines ready
    pub ready_replicas: i64,
}

impl MachineDeploymentInfo {
    /// True when every machine runs `version` and is ready
    pub fn is_converged(&self, version: &str) -> bool {
        self.version.as_deref() == Some(version)
            && self.replicas == self.desired_replicas
            && self.updated_replicas == self.desired_replicas
            && self.ready_replicas == self.desired_replicas
    }

    fn from_object(obj: &DynamicObject) -> Self {
        let data = &obj.data;
        Self {
            name: obj.metadata.name.clone().unwrap_or_default(),
            infrastructure_template_name: str_at(
                data,
                "/spec/template/spec/infrastructureRef/name",
            ),
            version: str_at(data, "/spec/template/spec/version"),
            desired_replicas: int_at(data, "/spec/replicas"),
            replicas: int_at(data, "/status/replicas"),
            updated_replicas: int_at(data, "/status/updatedReplicas"),
            ready_replicas: int_at(data, "/status/readyReplicas"),
        }
    }
}

impl CapiClusterInfo {
    fn from_object(obj: &DynamicObject) -> Self {
        let data = &obj.data;
        Self {
            name: obj.metadata.name.clone().unwrap_or_default(),
            phase: str_at(data, "/status/phase"),
            control_plane_ready: bool_at(data, "/status/controlPlaneReady")
                || condition_true(data, "ControlPlaneReady"),
            infrastructure_ready: bool_at(data, "/status/infrastructureReady"),
        }
    }
}

fn str_at(data: &Value, pointer: &str) -> Option<String> {
    data.pointer(pointer).and_then(|v| v.as_str()).map(str::to_string)
}

fn int_at(data: &Value, pointer: &str) -> i64 {
    data.pointer(pointer).and_then(|v| v.as_i64()).unwrap_or(0)
}

fn bool_at(data: &Value, pointer: &str) -> bool {
    data.pointer(pointer).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn condition_true(data: &Value, condition_type: &str) -> bool {
    data.pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(|t| t.as_str()) == Some(condition_type)
                    && c.get("status").and_then(|s| s.as_str()) == Some("True")
            })
        })
}

/// Trait abstracting reads and deletes of CAPI objects on a target cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CapiClient: Send + Sync {
    /// Get a CAPI `Cluster` by name, `None` if absent
    async fn get_capi_cluster(
        &self,
        target: &Cluster,
        name: &str,
        namespace: &str,
    ) -> Result<Option<CapiClusterInfo>>;

    /// List CAPI `Cluster` objects in a namespace
    async fn list_capi_clusters(
        &self,
        target: &Cluster,
        namespace: &str,
    ) -> Result<Vec<CapiClusterInfo>>;

    /// Get the `KubeadmControlPlane` generated for a cluster
    async fn get_kubeadm_control_plane(
        &self,
        target: &Cluster,
        cluster_name: &str,
        namespace: &str,
    ) -> Result<Option<KubeadmControlPlaneInfo>>;

    /// Get a `MachineDeployment` by name
    async fn get_machine_deployment(
        &self,
        target: &Cluster,
        name: &str,
        namespace: &str,
    ) -> Result<Option<MachineDeploymentInfo>>;

    /// List the `MachineDeployment`s belonging to a cluster
    async fn list_machine_deployments(
        &self,
        target: &Cluster,
        cluster_name: &str,
        namespace: &str,
    ) -> Result<Vec<MachineDeploymentInfo>>;

    /// Count objects of a kind labelled with the cluster name
    async fn count_objects(
        &self,
        target: &Cluster,
        api_version: &str,
        kind: &str,
        cluster_name: &str,
        namespace: &str,
    ) -> Result<usize>;

    /// Kubeconfig CAPI stored for a cluster, `None` until it exists
    async fn get_kubeconfig_secret(
        &self,
        target: &Cluster,
        cluster_name: &str,
        namespace: &str,
    ) -> Result<Option<String>>;

    /// Delete a CAPI `Cluster`; deleting an absent one succeeds
    async fn delete_capi_cluster(&self, target: &Cluster, name: &str, namespace: &str)
        -> Result<()>;
}

/// Real client building a kube client from each target's kubeconfig
#[derive(Clone, Debug, Default)]
pub struct KubeCapiClient;

impl KubeCapiClient {
    /// Create a new client
    pub fn new() -> Self {
        Self
    }

    async fn api(
        &self,
        target: &Cluster,
        api_version: &str,
        kind: &str,
        namespace: &str,
    ) -> Result<Api<DynamicObject>> {
        let client = create_client(target.kubeconfig()).await?;
        let ar = build_api_resource(api_version, kind);
        Ok(Api::namespaced_with(client, namespace, &ar))
    }
}

#[async_trait]
impl CapiClient for KubeCapiClient {
    async fn get_capi_cluster(
        &self,
        target: &Cluster,
        name: &str,
        namespace: &str,
    ) -> Result<Option<CapiClusterInfo>> {
        let api = self.api(target, CAPI_API_VERSION, KIND_CLUSTER, namespace).await?;
        Ok(api.get_opt(name).await?.as_ref().map(CapiClusterInfo::from_object))
    }

    async fn list_capi_clusters(
        &self,
        target: &Cluster,
        namespace: &str,
    ) -> Result<Vec<CapiClusterInfo>> {
        let api = self.api(target, CAPI_API_VERSION, KIND_CLUSTER, namespace).await?;
        let list = api.list(&ListParams::default()).await?;
        debug!(target_cluster = %target, count = list.items.len(), "listed CAPI clusters");
        Ok(list.items.iter().map(CapiClusterInfo::from_object).collect())
    }

    async fn get_kubeadm_control_plane(
        &self,
        target: &Cluster,
        cluster_name: &str,
        namespace: &str,
    ) -> Result<Option<KubeadmControlPlaneInfo>> {
        let api = self
            .api(target, CONTROL_PLANE_API_VERSION, KIND_KUBEADM_CONTROL_PLANE, namespace)
            .await?;
        Ok(api
            .get_opt(&control_plane_name(cluster_name))
            .await?
            .as_ref()
            .map(KubeadmControlPlaneInfo::from_object))
    }

    async fn get_machine_deployment(
        &self,
        target: &Cluster,
        name: &str,
        namespace: &str,
    ) -> Result<Option<MachineDeploymentInfo>> {
        let api = self
            .api(target, CAPI_API_VERSION, KIND_MACHINE_DEPLOYMENT, namespace)
            .await?;
        Ok(api.get_opt(name).await?.as_ref().map(MachineDeploymentInfo::from_object))
    }

    async fn list_machine_deployments(
        &self,
        target: &Cluster,
        cluster_name: &str,
        namespace: &str,
    ) -> Result<Vec<MachineDeploymentInfo>> {
        let api = self
            .api(target, CAPI_API_VERSION, KIND_MACHINE_DEPLOYMENT, namespace)
            .await?;
        let params = ListParams::default().labels(&format!("{}={}", CLUSTER_NAME_LABEL, cluster_name));
        let list = api.list(&params).await?;
        Ok(list.items.iter().map(MachineDeploymentInfo::from_object).collect())
    }

    async fn count_objects(
        &self,
        target: &Cluster,
        api_version: &str,
        kind: &str,
        cluster_name: &str,
        namespace: &str,
    ) -> Result<usize> {
        let api = self.api(target, api_version, kind, namespace).await?;
        let params = ListParams::default().labels(&format!("{}={}", CLUSTER_NAME_LABEL, cluster_name));
        Ok(api.list(&params).await?.items.len())
    }

    async fn get_kubeconfig_secret(
        &self,
        target: &Cluster,
        cluster_name: &str,
        namespace: &str,
    ) -> Result<Option<String>> {
        let client = create_client(target.kubeconfig()).await?;
        let secret = kubeconfig_secret_name(cluster_name);
        match get_secret_data(&client, &secret, namespace, KUBECONFIG_SECRET_KEY).await? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
                Error::serialization_for_kind("Secret", format!("{} is not UTF-8: {}", secret, e))
            }),
            None => Ok(None),
        }
    }

    async fn delete_capi_cluster(
        &self,
        target: &Cluster,
        name: &str,
        namespace: &str,
    ) -> Result<()> {
        let api = self.api(target, CAPI_API_VERSION, KIND_CLUSTER, namespace).await?;
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(cluster = %name, target_cluster = %target, "deleted CAPI cluster");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(name: &str, data: Value) -> DynamicObject {
        let ar = build_api_resource(CAPI_API_VERSION, KIND_CLUSTER);
        let mut obj = DynamicObject::new(name, &ar);
        obj.data = data;
        obj
    }

    #[test]
    fn reads_control_plane_template_and_replicas() {
        let obj = object(
            "dev-control-plane",
            json!({
                "spec": {
                    "replicas": 3,
                    "version": "v1.29.4",
                    "machineTemplate": {"infrastructureRef": {"name": "dev-control-plane-template-1"}}
                },
                "status": {"replicas": 3, "updatedReplicas": 2, "readyReplicas": 2, "version": "v1.28.9"}
            }),
        );
        let kcp = KubeadmControlPlaneInfo::from_object(&obj);
        assert_eq!(kcp.observed_version.as_deref(), Some("v1.28.9"));
        assert_eq!(kcp.name, "dev-control-plane");
        assert_eq!(
            kcp.infrastructure_template_name.as_deref(),
            Some("dev-control-plane-template-1")
        );
        assert!(!kcp.is_converged("v1.29.4"));
    }

    #[test]
    fn control_plane_converges_when_all_replicas_match() {
        let kcp = KubeadmControlPlaneInfo {
            version: Some("v1.29.4".to_string()),
            observed_version: Some("v1.29.4".to_string()),
            desired_replicas: 1,
            replicas: 1,
            updated_replicas: 1,
            ready_replicas: 1,
            ..Default::default()
        };
        assert!(kcp.is_converged("v1.29.4"));
        assert!(!kcp.is_converged("v1.30.1"));
    }

    #[test]
    fn reads_machine_deployment_template() {
        let obj = object(
            "dev-md-0",
            json!({
                "spec": {
                    "replicas": 2,
                    "template": {"spec": {
                        "version": "v1.29.4",
                        "infrastructureRef": {"name": "dev-md-0-template-5"}
                    }}
                },
                "status": {"replicas": 2, "updatedReplicas": 2, "readyReplicas": 2}
            }),
        );
        let md = MachineDeploymentInfo::from_object(&obj);
        assert_eq!(md.infrastructure_template_name.as_deref(), Some("dev-md-0-template-5"));
        assert!(md.is_converged("v1.29.4"));
    }

    #[test]
    fn missing_status_reads_as_zero_replicas() {
        let md = MachineDeploymentInfo::from_object(&object("dev-md-0", json!({"spec": {"replicas": 1}})));
        assert_eq!(md.ready_replicas, 0);
        assert!(md.infrastructure_template_name.is_none());
    }

    #[test]
    fn cluster_control_plane_ready_from_flag_or_condition() {
        let flagged = CapiClusterInfo::from_object(&object(
            "a",
            json!({"status": {"controlPlaneReady": true, "phase": "Provisioned"}}),
        ));
        assert!(flagged.control_plane_ready);
        assert_eq!(flagged.phase.as_deref(), Some("Provisioned"));

        let conditioned = CapiClusterInfo::from_object(&object(
            "b",
            json!({"status": {"conditions": [{"type": "ControlPlaneReady", "status": "True"}]}}),
        ));
        assert!(conditioned.control_plane_ready);

        let pending = CapiClusterInfo::from_object(&object("c", json!({})));
        assert!(!pending.control_plane_ready);
    }
}
