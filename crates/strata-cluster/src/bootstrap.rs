//! Ephemeral bootstrap cluster
//!
//! The bootstrap cluster is a single-node kind cluster with the host's
//! Docker socket mounted, so the Docker infrastructure provider running
//! inside it can create sibling node containers. It lives only for the
//! duration of one workflow run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use strata_common::process::{run_command, run_command_with_stdin};
use strata_common::retry::{poll_until, PollConfig};
use strata_common::{
    clusterctl, kube_utils, Cluster, ClusterSpec, Error, Result, BOOTSTRAP_CLUSTER_SUFFIX,
    CAPI_CLUSTERS_CRD,
};

/// Kind cluster config with the Docker socket mounted for CAPD
pub const KIND_CONFIG_WITH_DOCKER: &str = r#"kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
nodes:
- role: control-plane
  extraMounts:
  - hostPath: /var/run/docker.sock
    containerPath: /var/run/docker.sock
"#;

const KIND_CREATE_TIMEOUT: Duration = Duration::from_secs(300);
const KIND_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Node readiness wait after `kind create`
const NODES_READY: PollConfig = PollConfig::elapsed(Duration::from_secs(120), Duration::from_secs(2));

/// CAPI CRD wait after `clusterctl init`
const CAPI_CRDS_READY: PollConfig = PollConfig::elapsed(Duration::from_secs(120), Duration::from_secs(2));

/// Name of the bootstrap cluster for a workload cluster
pub fn bootstrap_cluster_name(cluster_name: &str) -> String {
    format!("{}-{}", cluster_name, BOOTSTRAP_CLUSTER_SUFFIX)
}

/// Options for tearing down a bootstrap cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeleteBootstrapOptions {
    /// Tolerate missing state and failures from a partially failed prior run
    pub force_cleanup: bool,
}

/// Lifecycle of the ephemeral bootstrap cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Bootstrapper: Send + Sync {
    /// Create the bootstrap cluster and wait for its nodes
    async fn create_bootstrap_cluster(
        &self,
        spec: &ClusterSpec,
        cancel: &CancellationToken,
    ) -> Result<Cluster>;

    /// An existing bootstrap cluster for this spec, left by an earlier run
    async fn find_bootstrap_cluster(&self, spec: &ClusterSpec) -> Result<Option<Cluster>>;

    /// Install Cluster API with the given clusterctl infrastructure provider
    async fn install_capi(
        &self,
        cluster: &Cluster,
        infrastructure: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Delete a bootstrap cluster; usable standalone with `force_cleanup`
    async fn delete_bootstrap_cluster(
        &self,
        cluster: &Cluster,
        options: DeleteBootstrapOptions,
    ) -> Result<()>;
}

/// `Bootstrapper` backed by the kind CLI
#[derive(Clone, Debug)]
pub struct KindBootstrapper {
    work_dir: PathBuf,
    kind_binary: PathBuf,
}

impl KindBootstrapper {
    /// Create a bootstrapper writing kubeconfigs under `work_dir`
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            kind_binary: PathBuf::from("kind"),
        }
    }

    /// Use a specific kind executable instead of the one on `PATH`
    pub fn with_kind_binary(mut self, kind_binary: impl Into<PathBuf>) -> Self {
        self.kind_binary = kind_binary.into();
        self
    }

    /// Kubeconfig path of a bootstrap cluster: `<work>/<cluster>/generated/<bootstrap>.kind.kubeconfig`
    pub fn kubeconfig_path(&self, cluster_name: &str) -> PathBuf {
        self.work_dir
            .join(cluster_name)
            .join("generated")
            .join(format!("{}.kind.kubeconfig", bootstrap_cluster_name(cluster_name)))
    }

    async fn kind(&self, args: &[&str], description: &str) -> std::result::Result<String, String> {
        let mut cmd = Command::new(&self.kind_binary);
        cmd.args(args);
        run_command(&mut cmd, description, KIND_COMMAND_TIMEOUT).await
    }

    async fn export_kubeconfig(&self, name: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::internal_with_context(
                    "bootstrap",
                    format!("failed to create {}: {}", parent.display(), e),
                )
            })?;
        }
        let path_str = path.to_str().ok_or_else(|| {
            Error::internal_with_context("bootstrap", "kubeconfig path contains invalid UTF-8")
        })?;
        self.kind(
            &["export", "kubeconfig", "--name", name, "--kubeconfig", path_str],
            &format!("kind export kubeconfig (cluster={})", name),
        )
        .await
        .map(|_| ())
        .map_err(|e| Error::execution_permanent(name, "kind export kubeconfig", e))
    }

    /// Export the kubeconfig of a freshly created cluster and wait for its nodes
    async fn wait_until_usable(
        &self,
        name: &str,
        kubeconfig: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.export_kubeconfig(name, kubeconfig).await?;

        let client = kube_utils::create_client(Some(kubeconfig)).await?;
        poll_until(&NODES_READY, "bootstrap nodes ready", cancel, || {
            let client = client.clone();
            async move { kube_utils::all_nodes_ready(&client).await }
        })
        .await
    }
}

#[async_trait]
impl Bootstrapper for KindBootstrapper {
    async fn create_bootstrap_cluster(
        &self,
        spec: &ClusterSpec,
        cancel: &CancellationToken,
    ) -> Result<Cluster> {
        let name = bootstrap_cluster_name(spec.name());
        let kubeconfig = self.kubeconfig_path(spec.name());
        info!(cluster = %name, "creating bootstrap cluster");

        if self
            .kind(&["delete", "cluster", "--name", name.as_str()], "kind delete stale cluster")
            .await
            .is_err()
        {
            warn!(cluster = %name, "could not delete stale bootstrap cluster");
        }

        let mut cmd = Command::new(&self.kind_binary);
        cmd.args([
            "create",
            "cluster",
            "--name",
            name.as_str(),
            "--image",
            spec.versions_bundle.kind_node.uri.as_str(),
            "--config",
            "-",
        ]);
        run_command_with_stdin(
            &mut cmd,
            KIND_CONFIG_WITH_DOCKER,
            &format!("kind create cluster (cluster={})", name),
            KIND_CREATE_TIMEOUT,
        )
        .await
        .map_err(|e| Error::execution_permanent(&name, "kind create cluster", e))?;

        // The cluster exists from here on; the caller never sees a handle
        // to it unless this function succeeds.
        if let Err(e) = self.wait_until_usable(&name, &kubeconfig, cancel).await {
            warn!(cluster = %name, error = %e, "bootstrap cluster unusable, deleting it");
            if let Err(delete_err) = self
                .kind(
                    &["delete", "cluster", "--name", name.as_str()],
                    &format!("kind delete cluster (cluster={})", name),
                )
                .await
            {
                warn!(cluster = %name, error = %delete_err, "failed to delete unusable bootstrap cluster");
            }
            return Err(e);
        }

        info!(cluster = %name, kubeconfig = %kubeconfig.display(), "bootstrap cluster ready");
        Ok(Cluster::new(name, kubeconfig))
    }

    async fn find_bootstrap_cluster(&self, spec: &ClusterSpec) -> Result<Option<Cluster>> {
        let name = bootstrap_cluster_name(spec.name());
        let clusters = match self.kind(&["get", "clusters"], "kind get clusters").await {
            Ok(out) => out,
            Err(e) => {
                debug!(error = %e, "could not list kind clusters");
                return Ok(None);
            }
        };
        if !clusters.lines().any(|line| line.trim() == name) {
            return Ok(None);
        }

        let kubeconfig = self.kubeconfig_path(spec.name());
        self.export_kubeconfig(&name, &kubeconfig).await?;
        info!(cluster = %name, kubeconfig = %kubeconfig.display(), "found existing bootstrap cluster");
        Ok(Some(Cluster::new(name, kubeconfig)))
    }

    async fn install_capi(
        &self,
        cluster: &Cluster,
        infrastructure: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let kubeconfig = cluster.kubeconfig().ok_or_else(|| {
            Error::internal_with_context("install_capi", format!("no kubeconfig for {}", cluster))
        })?;
        clusterctl::init(kubeconfig, &cluster.name, infrastructure, cancel).await?;

        let client = kube_utils::create_client(Some(kubeconfig)).await?;
        poll_until(&CAPI_CRDS_READY, "CAPI CRDs installed", cancel, || {
            let client = client.clone();
            async move { kube_utils::crd_exists(&client, CAPI_CLUSTERS_CRD).await }
        })
        .await?;
        info!(cluster = %cluster, infrastructure = %infrastructure, "Cluster API installed");
        Ok(())
    }

    async fn delete_bootstrap_cluster(
        &self,
        cluster: &Cluster,
        options: DeleteBootstrapOptions,
    ) -> Result<()> {
        info!(cluster = %cluster, force_cleanup = options.force_cleanup, "deleting bootstrap cluster");
        let result = self
            .kind(
                &["delete", "cluster", "--name", cluster.name.as_str()],
                &format!("kind delete cluster (cluster={})", cluster.name),
            )
            .await;

        if let Err(e) = result {
            if !options.force_cleanup {
                return Err(Error::execution(&cluster.name, "kind delete cluster", e));
            }
            warn!(cluster = %cluster, error = %e, "ignoring bootstrap delete failure during cleanup");
        }

        if let Some(kubeconfig) = cluster.kubeconfig() {
            match std::fs::remove_file(kubeconfig) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %kubeconfig.display(), error = %e, "failed to remove bootstrap kubeconfig"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spec;

    #[test]
    fn bootstrap_name_carries_suffix() {
        assert_eq!(bootstrap_cluster_name("dev"), "dev-strata-bootstrap");
    }

    #[test]
    fn kubeconfig_lives_under_generated_dir() {
        let bootstrapper = KindBootstrapper::new("/work");
        assert_eq!(
            bootstrapper.kubeconfig_path("dev"),
            PathBuf::from("/work/dev/generated/dev-strata-bootstrap.kind.kubeconfig")
        );
    }

    #[test]
    fn kind_config_mounts_docker_socket() {
        let value: serde_yaml::Value = serde_yaml::from_str(KIND_CONFIG_WITH_DOCKER).unwrap();
        assert_eq!(
            value["nodes"][0]["extraMounts"][0]["hostPath"].as_str(),
            Some("/var/run/docker.sock")
        );
    }

    // =========================================================================
    // kind CLI interaction
    // =========================================================================

    /// Write an executable standing in for kind that logs its arguments
    #[cfg(unix)]
    fn fake_kind(dir: &Path, body: &str) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("kind.log");
        let script = dir.join("kind");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$*\" >> \"{}\"\n{}\nexit 0\n", log.display(), body),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script, log)
    }

    #[cfg(unix)]
    fn logged_calls(log: &Path) -> Vec<String> {
        std::fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Story: kind creates the cluster but hands back a kubeconfig that
    /// cannot be parsed. The half-built cluster is deleted before the error
    /// is returned, since no caller ever receives a handle to it.
    #[cfg(unix)]
    #[tokio::test]
    async fn unusable_bootstrap_cluster_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let (kind, log) = fake_kind(
            dir.path(),
            r#"case "$1" in
  create) cat > /dev/null ;;
  export) printf 'clusters: [unterminated' > "$6" ;;
esac"#,
        );
        let bootstrapper = KindBootstrapper::new(dir.path().join("work")).with_kind_binary(&kind);

        let result = bootstrapper
            .create_bootstrap_cluster(&spec("dev"), &CancellationToken::new())
            .await;
        assert!(result.is_err());

        let calls = logged_calls(&log);
        assert_eq!(calls.len(), 4, "unexpected kind calls: {calls:?}");
        assert_eq!(calls[0], "delete cluster --name dev-strata-bootstrap");
        assert!(calls[1].starts_with("create cluster --name dev-strata-bootstrap"));
        assert!(calls[2].starts_with("export kubeconfig --name dev-strata-bootstrap"));
        assert_eq!(calls[3], "delete cluster --name dev-strata-bootstrap");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_kubeconfig_export_deletes_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let (kind, log) = fake_kind(
            dir.path(),
            r#"case "$1" in
  create) cat > /dev/null ;;
  export) echo "no nodes found" >&2; exit 1 ;;
esac"#,
        );
        let bootstrapper = KindBootstrapper::new(dir.path().join("work")).with_kind_binary(&kind);

        let err = bootstrapper
            .create_bootstrap_cluster(&spec("dev"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("kind export kubeconfig"));
        assert_eq!(
            logged_calls(&log).last().map(String::as_str),
            Some("delete cluster --name dev-strata-bootstrap")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn existing_bootstrap_cluster_is_found_and_exported() {
        let dir = tempfile::tempdir().unwrap();
        let (kind, log) = fake_kind(
            dir.path(),
            r#"case "$1" in
  get) echo prod-strata-bootstrap; echo dev-strata-bootstrap ;;
esac"#,
        );
        let bootstrapper = KindBootstrapper::new(dir.path().join("work")).with_kind_binary(&kind);

        let found = bootstrapper.find_bootstrap_cluster(&spec("dev")).await.unwrap().unwrap();
        assert_eq!(found.name, "dev-strata-bootstrap");
        assert_eq!(found.kubeconfig_file, bootstrapper.kubeconfig_path("dev"));
        assert!(logged_calls(&log)
            .iter()
            .any(|call| call.starts_with("export kubeconfig --name dev-strata-bootstrap")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_bootstrap_cluster_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (kind, _) = fake_kind(dir.path(), r#"[ "$1" = get ] && echo prod-strata-bootstrap"#);
        let bootstrapper = KindBootstrapper::new(dir.path().join("work")).with_kind_binary(&kind);
        assert!(bootstrapper.find_bootstrap_cluster(&spec("dev")).await.unwrap().is_none());

        let broken = KindBootstrapper::new(dir.path().join("work"))
            .with_kind_binary(dir.path().join("no-such-kind"));
        assert!(broken.find_bootstrap_cluster(&spec("dev")).await.unwrap().is_none());
    }
}
