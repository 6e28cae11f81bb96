//! Cluster Manager: apply, wait on and move CAPI objects
//!
//! Every blocking wait polls at a fixed interval and honours the workflow's
//! cancellation token. Reads of live CAPI objects go through [`CapiClient`]
//! so the waiting logic is testable without an API server.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::CustomResourceExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use strata_capi::constants::{
    BOOTSTRAP_API_VERSION, CAPI_API_VERSION, CONTROL_PLANE_API_VERSION, KIND_CLUSTER,
    KIND_KUBEADM_CONFIG_TEMPLATE, KIND_KUBEADM_CONTROL_PLANE, KIND_MACHINE,
    KIND_MACHINE_DEPLOYMENT,
};
use strata_capi::{CapiClient, CapiClusterInfo, MoveKind, Provider};
use strata_common::bundle::{Bundles, VersionsBundle};
use strata_common::crd::{GitOpsConfig, StrataCluster};
use strata_common::kubeconfig::{kubeconfig_path, write_kubeconfig};
use strata_common::retry::{poll_until, retry_fixed, PollConfig, RetryPolicy};
use strata_common::{
    clusterctl, kube_utils, Cluster, ClusterSpec, Error, Result, BUNDLES_NUMBER_ANNOTATION,
    FIELD_MANAGER, STRATA_CLUSTERS_CRD, STRATA_SYSTEM_NAMESPACE, VERSIONS_BUNDLE_ANNOTATION,
};

/// Namespace Strata cluster objects are written to when they name none
const DEFAULT_OBJECT_NAMESPACE: &str = "default";

/// Core CAPI kinds every moved cluster must have on the target
const CORE_MOVE_KINDS: &[MoveKind] = &[
    MoveKind::new(CAPI_API_VERSION, KIND_CLUSTER),
    MoveKind::new(CONTROL_PLANE_API_VERSION, KIND_KUBEADM_CONTROL_PLANE),
    MoveKind::new(CAPI_API_VERSION, KIND_MACHINE_DEPLOYMENT),
    MoveKind::new(CAPI_API_VERSION, KIND_MACHINE),
    MoveKind::new(BOOTSTRAP_API_VERSION, KIND_KUBEADM_CONFIG_TEMPLATE),
];

/// Interval and ceiling of each wait the manager performs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Waits {
    /// CAPI Cluster `ControlPlaneReady`
    pub control_plane: PollConfig,
    /// Control plane and machine deployments at the target version
    pub version_convergence: PollConfig,
    /// CAPI Cluster gone after delete
    pub deletion: PollConfig,
    /// Kubeconfig secret written by CAPI
    pub kubeconfig_secret: RetryPolicy,
    /// Each server-side apply
    pub apply: RetryPolicy,
    /// Strata CRDs established after install
    pub crds: PollConfig,
}

impl Default for Waits {
    fn default() -> Self {
        Self {
            control_plane: PollConfig::CONTROL_PLANE,
            version_convergence: PollConfig::VERSION_CONVERGENCE,
            deletion: PollConfig::elapsed(Duration::from_secs(600), Duration::from_secs(10)),
            kubeconfig_secret: RetryPolicy::fixed(30, Duration::from_secs(10)),
            apply: RetryPolicy::EXECUTION,
            crds: PollConfig::elapsed(Duration::from_secs(60), Duration::from_secs(2)),
        }
    }
}

/// Operations on the CAPI objects of a cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterManager: Send + Sync {
    /// Server-side apply every document of a multi-document manifest
    async fn apply_manifests(
        &self,
        cluster: &Cluster,
        manifests: &[u8],
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Wait for the CAPI Cluster's control plane to report ready
    async fn wait_for_control_plane_ready(
        &self,
        cluster: &Cluster,
        cluster_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Wait for every machine of a cluster to run `version`
    async fn wait_for_version_convergence(
        &self,
        cluster: &Cluster,
        cluster_name: &str,
        version: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Wait for the workload control plane and write its kubeconfig
    async fn create_workload_cluster(
        &self,
        bootstrap: &Cluster,
        spec: &ClusterSpec,
        cancel: &CancellationToken,
    ) -> Result<Cluster>;

    /// Move a cluster's CAPI objects and verify they arrived
    async fn move_capi(
        &self,
        from: &Cluster,
        to: &Cluster,
        cluster_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Delete a workload cluster's CAPI objects and wait until they are gone
    async fn delete_cluster(
        &self,
        management: &Cluster,
        cluster_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// CAPI clusters present on a cluster
    async fn list_capi_clusters(&self, cluster: &Cluster) -> Result<Vec<CapiClusterInfo>>;

    /// Whether a CRD is installed on a cluster
    async fn crd_exists(&self, cluster: &Cluster, crd: &str) -> Result<bool>;

    /// Install the Strata CRDs and record the cluster's spec on a cluster
    async fn install_strata_resources(
        &self,
        cluster: &Cluster,
        spec: &ClusterSpec,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Read back the spec recorded for a cluster
    async fn get_cluster_spec(
        &self,
        cluster: &Cluster,
        cluster_name: &str,
        bundles: &Bundles,
    ) -> Result<ClusterSpec>;

    /// Remove the cluster object and GitOps config recorded on a cluster
    async fn delete_strata_resources(&self, cluster: &Cluster, spec: &ClusterSpec) -> Result<()>;

    /// Remove the kubeconfig and generated files kept for a cluster.
    ///
    /// The cluster's directory itself goes only once nothing else is left in it.
    fn remove_cluster_files(&self, cluster_name: &str) -> Result<()>;
}

/// `ClusterManager` talking to real clusters
pub struct KubeClusterManager {
    provider: Arc<dyn Provider>,
    capi: Arc<dyn CapiClient>,
    work_dir: PathBuf,
    namespace: String,
    waits: Waits,
}

impl KubeClusterManager {
    /// Create a manager writing workload kubeconfigs under `work_dir`
    pub fn new(
        provider: Arc<dyn Provider>,
        capi: Arc<dyn CapiClient>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider,
            capi,
            work_dir: work_dir.into(),
            namespace: STRATA_SYSTEM_NAMESPACE.to_string(),
            waits: Waits::default(),
        }
    }

    /// Override wait intervals and ceilings
    pub fn with_waits(mut self, waits: Waits) -> Self {
        self.waits = waits;
        self
    }

    /// Confirm every expected kind exists on the move target
    async fn verify_move(&self, to: &Cluster, cluster_name: &str) -> Result<()> {
        let expected: Vec<MoveKind> = CORE_MOVE_KINDS
            .iter()
            .copied()
            .chain(self.provider.move_kinds())
            .collect();

        let counts = try_join_all(expected.iter().map(|kind| {
            self.capi
                .count_objects(to, kind.api_version, kind.kind, cluster_name, &self.namespace)
        }))
        .await?;

        let missing: Vec<String> = expected
            .iter()
            .zip(counts)
            .inspect(|(kind, count)| {
                debug!(cluster = %cluster_name, kind = %kind.kind, count, "verified moved objects")
            })
            .filter(|(_, count)| *count == 0)
            .map(|(kind, _)| kind.kind.to_string())
            .collect();

        if missing.is_empty() {
            info!(cluster = %cluster_name, target = %to, "move verified");
            return Ok(());
        }
        Err(Error::move_failed(
            cluster_name,
            format!("objects missing on {} after move", to),
            missing,
        ))
    }

    /// Control plane and every machine deployment at `version`
    async fn machines_converged(
        &self,
        cluster: &Cluster,
        cluster_name: &str,
        version: &str,
    ) -> Result<bool> {
        let ns = self.namespace.as_str();
        let control_plane = self
            .capi
            .get_kubeadm_control_plane(cluster, cluster_name, ns)
            .await?;
        if !control_plane.is_some_and(|kcp| kcp.is_converged(version)) {
            return Ok(false);
        }
        let deployments = self
            .capi
            .list_machine_deployments(cluster, cluster_name, ns)
            .await?;
        Ok(deployments.iter().all(|md| md.is_converged(version)))
    }

    async fn wait_for_strata_crds(&self, client: &kube::Client, cancel: &CancellationToken) -> Result<()> {
        poll_until(&self.waits.crds, "Strata CRDs installed", cancel, || {
            let client = client.clone();
            async move { kube_utils::crd_exists(&client, STRATA_CLUSTERS_CRD).await }
        })
        .await
    }

    async fn client_for(&self, cluster: &Cluster) -> Result<kube::Client> {
        kube_utils::create_client(cluster.kubeconfig()).await
    }
}

/// Namespace the cluster object of `spec` is recorded in
fn object_namespace(spec: &ClusterSpec) -> String {
    spec.cluster
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| DEFAULT_OBJECT_NAMESPACE.to_string())
}

/// Delete a namespaced object, treating an absent one as deleted
async fn delete_if_present<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn remove_path(path: &std::path::Path) -> Result<()> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::internal_with_context(
            "remove_cluster_files",
            format!("failed to remove {}: {}", path.display(), e),
        )),
    }
}

fn kubeconfig_of(cluster: &Cluster, operation: &str) -> Result<PathBuf> {
    cluster
        .kubeconfig()
        .map(|p| p.to_path_buf())
        .ok_or_else(|| Error::internal_with_context(operation, format!("no kubeconfig for {}", cluster)))
}

/// The cluster object as applied to a cluster, stamped with its bundle
/// release and resolved component versions
fn strata_cluster_manifest(spec: &ClusterSpec) -> Result<Value> {
    let mut cluster = spec.cluster.clone();
    let meta = &mut cluster.metadata;
    meta.resource_version = None;
    meta.uid = None;
    meta.managed_fields = None;
    meta.creation_timestamp = None;
    meta.generation = None;
    if meta.namespace.is_none() {
        meta.namespace = Some(DEFAULT_OBJECT_NAMESPACE.to_string());
    }
    let annotations = meta.annotations.get_or_insert_with(Default::default);
    annotations.insert(BUNDLES_NUMBER_ANNOTATION.to_string(), spec.bundles_number.to_string());
    annotations.insert(
        VERSIONS_BUNDLE_ANNOTATION.to_string(),
        serde_json::to_string(&spec.versions_bundle)?,
    );
    Ok(serde_json::to_value(&cluster)?)
}

/// Rebuild a spec from a live cluster object.
///
/// Component versions come from the recorded versions bundle; objects
/// applied without one resolve against the active release.
fn spec_from_live(
    cluster: StrataCluster,
    git_ops: Option<GitOpsConfig>,
    bundles: &Bundles,
) -> Result<ClusterSpec> {
    let annotation = |key: &str| {
        cluster
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .cloned()
    };
    let number = annotation(BUNDLES_NUMBER_ANNOTATION)
        .and_then(|n| n.parse::<u32>().ok())
        .unwrap_or(bundles.number);
    let recorded = match annotation(VERSIONS_BUNDLE_ANNOTATION) {
        Some(json) => Some(serde_json::from_str::<VersionsBundle>(&json).map_err(|e| {
            Error::serialization_for_kind(
                "StrataCluster",
                format!("invalid {} annotation: {}", VERSIONS_BUNDLE_ANNOTATION, e),
            )
        })?),
        None => None,
    };

    let mut spec = match recorded {
        Some(versions_bundle) => ClusterSpec::with_versions_bundle(cluster, versions_bundle, number)?,
        None => ClusterSpec::new(cluster, bundles)?.with_bundles_number(number),
    };
    spec.git_ops_config = git_ops;
    Ok(spec)
}

#[async_trait]
impl ClusterManager for KubeClusterManager {
    async fn apply_manifests(
        &self,
        cluster: &Cluster,
        manifests: &[u8],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let docs = kube_utils::split_documents(manifests)?;
        let client = self.client_for(cluster).await?;

        let namespaces: BTreeSet<&str> = docs
            .iter()
            .filter_map(|d| d.pointer("/metadata/namespace").and_then(|n| n.as_str()))
            .collect();
        for ns in namespaces {
            kube_utils::ensure_namespace(&client, ns).await?;
        }

        for doc in &docs {
            let client = &client;
            retry_fixed(&self.waits.apply, "apply manifest", cancel, move || async move {
                kube_utils::apply_manifest(client, doc).await
            })
            .await?;
        }
        info!(cluster = %cluster, documents = docs.len(), "applied manifests");
        Ok(())
    }

    async fn wait_for_control_plane_ready(
        &self,
        cluster: &Cluster,
        cluster_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(cluster = %cluster_name, "waiting for control plane to be ready");
        let capi = &self.capi;
        let ns = self.namespace.as_str();
        poll_until(&self.waits.control_plane, "control plane ready", cancel, move || async move {
            capi.get_capi_cluster(cluster, cluster_name, ns)
                .await
                .map(|c| c.is_some_and(|c| c.control_plane_ready))
        })
        .await
    }

    async fn wait_for_version_convergence(
        &self,
        cluster: &Cluster,
        cluster_name: &str,
        version: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(cluster = %cluster_name, version = %version, "waiting for machines to converge");
        poll_until(&self.waits.version_convergence, "version convergence", cancel, || {
            self.machines_converged(cluster, cluster_name, version)
        })
        .await
    }

    async fn create_workload_cluster(
        &self,
        bootstrap: &Cluster,
        spec: &ClusterSpec,
        cancel: &CancellationToken,
    ) -> Result<Cluster> {
        let name = spec.name();
        self.wait_for_control_plane_ready(bootstrap, name, cancel).await?;

        let capi = &self.capi;
        let ns = self.namespace.as_str();
        let content = retry_fixed(&self.waits.kubeconfig_secret, "read kubeconfig secret", cancel, move || async move {
            capi.get_kubeconfig_secret(bootstrap, name, ns)
                .await?
                .ok_or_else(|| Error::execution(name, "read kubeconfig secret", "secret not found yet"))
        })
        .await?;

        let rewritten = self.provider.update_kubeconfig(&content, name).await?;
        let path = kubeconfig_path(&self.work_dir, name);
        write_kubeconfig(&path, &rewritten)?;
        info!(cluster = %name, kubeconfig = %path.display(), "workload cluster kubeconfig written");
        Ok(Cluster::new(name, path))
    }

    async fn move_capi(
        &self,
        from: &Cluster,
        to: &Cluster,
        cluster_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let source = kubeconfig_of(from, "move_capi")?;
        let target = kubeconfig_of(to, "move_capi")?;
        info!(cluster = %cluster_name, from = %from, to = %to, "moving CAPI objects");
        clusterctl::move_to_kubeconfig(&source, &target, &self.namespace, cluster_name, cancel).await?;
        self.verify_move(to, cluster_name).await
    }

    async fn delete_cluster(
        &self,
        management: &Cluster,
        cluster_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(cluster = %cluster_name, management = %management, "deleting workload cluster");
        self.capi
            .delete_capi_cluster(management, cluster_name, &self.namespace)
            .await?;

        let capi = &self.capi;
        let ns = self.namespace.as_str();
        poll_until(&self.waits.deletion, "cluster deletion", cancel, move || async move {
            capi.get_capi_cluster(management, cluster_name, ns)
                .await
                .map(|c| c.is_none())
        })
        .await
    }

    async fn list_capi_clusters(&self, cluster: &Cluster) -> Result<Vec<CapiClusterInfo>> {
        self.capi.list_capi_clusters(cluster, &self.namespace).await
    }

    async fn crd_exists(&self, cluster: &Cluster, crd: &str) -> Result<bool> {
        let client = self.client_for(cluster).await?;
        kube_utils::crd_exists(&client, crd).await
    }

    async fn install_strata_resources(
        &self,
        cluster: &Cluster,
        spec: &ClusterSpec,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let client = self.client_for(cluster).await?;
        let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
        for crd in [StrataCluster::crd(), GitOpsConfig::crd()] {
            let name = crd.metadata.name.clone().unwrap_or_default();
            crds.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&crd))
                .await?;
            debug!(crd = %name, "applied CRD");
        }

        self.wait_for_strata_crds(&client, cancel).await?;

        kube_utils::apply_manifest(&client, &strata_cluster_manifest(spec)?).await?;
        if let Some(git_ops) = &spec.git_ops_config {
            let mut git_ops = git_ops.clone();
            git_ops.metadata.namespace = spec
                .cluster
                .metadata
                .namespace
                .clone()
                .or_else(|| Some(DEFAULT_OBJECT_NAMESPACE.to_string()));
            git_ops.metadata.resource_version = None;
            git_ops.metadata.uid = None;
            kube_utils::apply_manifest(&client, &serde_json::to_value(&git_ops)?).await?;
        }
        info!(cluster = %spec.name(), target = %cluster, "recorded cluster spec");
        Ok(())
    }

    async fn get_cluster_spec(
        &self,
        cluster: &Cluster,
        cluster_name: &str,
        bundles: &Bundles,
    ) -> Result<ClusterSpec> {
        let client = self.client_for(cluster).await?;
        let clusters: Api<StrataCluster> = Api::all(client.clone());
        let params = ListParams::default().fields(&format!("metadata.name={}", cluster_name));
        let live = clusters
            .list(&params)
            .await?
            .items
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::validation_for(
                    cluster_name,
                    format!("StrataCluster {} not found on {}", cluster_name, cluster),
                )
            })?;

        let git_ops = match &live.spec.git_ops_ref {
            Some(git_ops_ref) => {
                let ns = live
                    .metadata
                    .namespace
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OBJECT_NAMESPACE.to_string());
                let api: Api<GitOpsConfig> = Api::namespaced(client, &ns);
                api.get_opt(&git_ops_ref.name).await?
            }
            None => None,
        };
        spec_from_live(live, git_ops, bundles)
    }

    async fn delete_strata_resources(&self, cluster: &Cluster, spec: &ClusterSpec) -> Result<()> {
        let client = self.client_for(cluster).await?;
        let ns = object_namespace(spec);

        let clusters: Api<StrataCluster> = Api::namespaced(client.clone(), &ns);
        delete_if_present(&clusters, spec.name()).await?;
        if let Some(git_ops_ref) = &spec.cluster.spec.git_ops_ref {
            let git_ops: Api<GitOpsConfig> = Api::namespaced(client, &ns);
            delete_if_present(&git_ops, &git_ops_ref.name).await?;
        }
        info!(cluster = %spec.name(), target = %cluster, "removed recorded cluster spec");
        Ok(())
    }

    fn remove_cluster_files(&self, cluster_name: &str) -> Result<()> {
        let dir = self.work_dir.join(cluster_name);
        remove_path(&dir.join("generated"))?;
        remove_path(&kubeconfig_path(&self.work_dir, cluster_name))?;

        // The cluster config usually lives here too and is the user's to keep.
        match std::fs::remove_dir(&dir) {
            Ok(()) => debug!(path = %dir.display(), "removed cluster directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %dir.display(), error = %e, "keeping cluster directory"),
        }
        info!(cluster = %cluster_name, "removed cluster files");
        Ok(())
    }
}
