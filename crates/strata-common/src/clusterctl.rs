//! clusterctl execution with timeouts and fixed-interval retries
//!
//! Every invocation runs under a timeout. `move` failures unpause the source
//! Cluster before the next attempt, since a failed move can leave it paused.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::core::DynamicObject;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::kube_utils;
use crate::process::run_command;
use crate::retry::{retry_fixed, RetryPolicy};
use crate::{Error, Result};

/// Timeout for `clusterctl move`
const MOVE_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for `clusterctl init`, which waits for provider deployments
const INIT_TIMEOUT: Duration = Duration::from_secs(600);

/// API version of the CAPI Cluster kind
const CAPI_CLUSTER_API_VERSION: &str = "cluster.x-k8s.io/v1beta1";

/// Install Cluster API core and the given infrastructure provider
///
/// `infrastructure` is a clusterctl provider spec such as `docker:v1.6.4`.
pub async fn init(
    kubeconfig: &Path,
    cluster_name: &str,
    infrastructure: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    retry_fixed(&RetryPolicy::EXECUTION, "clusterctl init", cancel, || {
        let kubeconfig = kubeconfig.to_path_buf();
        let infrastructure = infrastructure.to_string();
        async move {
            let mut cmd = Command::new("clusterctl");
            cmd.arg("init")
                .arg("--infrastructure")
                .arg(&infrastructure)
                .arg("--kubeconfig")
                .arg(&kubeconfig)
                .arg("--wait-providers");
            run_command(
                &mut cmd,
                &format!("clusterctl init (cluster={}, infrastructure={})", cluster_name, infrastructure),
                INIT_TIMEOUT,
            )
            .await
            .map(|_| ())
            .map_err(|e| Error::execution(cluster_name, "clusterctl init", e))
        }
    })
    .await
}

/// Move one cluster's CAPI objects in `namespace` from the source cluster
/// to the target
///
/// Only objects belonging to `cluster_name` move; other clusters managed
/// from the same namespace stay put. Source objects are deleted by
/// clusterctl once the target holds them.
/// Before each retry the source Cluster is unpaused to recover from a
/// partially applied attempt.
pub async fn move_to_kubeconfig(
    source_kubeconfig: &Path,
    target_kubeconfig: &Path,
    namespace: &str,
    cluster_name: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut attempt = 0u32;
    retry_fixed(&RetryPolicy::EXECUTION, "clusterctl move", cancel, || {
        attempt += 1;
        let attempt = attempt;
        let source_kc = source_kubeconfig.to_path_buf();
        let target_kc = target_kubeconfig.to_path_buf();
        let namespace = namespace.to_string();
        let cluster_name = cluster_name.to_string();

        async move {
            if attempt > 1 {
                if let Err(e) = unpause_capi_cluster(&source_kc, &namespace, &cluster_name).await {
                    warn!(cluster = %cluster_name, error = %e, "failed to unpause CAPI cluster before retry");
                }
            }

            let mut cmd = Command::new("clusterctl");
            cmd.args(move_args(&source_kc, &target_kc, &namespace, &cluster_name));

            run_command(
                &mut cmd,
                &format!("clusterctl move (cluster={})", cluster_name),
                MOVE_TIMEOUT,
            )
            .await
            .map_err(|e| Error::execution(&cluster_name, "clusterctl move", e))?;

            info!(cluster = %cluster_name, namespace = %namespace, "CAPI move complete");
            Ok::<_, Error>(())
        }
    })
    .await
}

/// Arguments of `clusterctl move` scoped to a single cluster
fn move_args(
    source_kubeconfig: &Path,
    target_kubeconfig: &Path,
    namespace: &str,
    cluster_name: &str,
) -> Vec<OsString> {
    vec![
        "move".into(),
        "--kubeconfig".into(),
        source_kubeconfig.into(),
        "--to-kubeconfig".into(),
        target_kubeconfig.into(),
        "--namespace".into(),
        namespace.into(),
        "--filter-cluster".into(),
        cluster_name.into(),
    ]
}

/// Unpause a CAPI cluster
pub async fn unpause_capi_cluster(
    kubeconfig: &Path,
    namespace: &str,
    cluster_name: &str,
) -> Result<()> {
    let client = kube_utils::create_client(Some(kubeconfig)).await?;
    let ar = kube_utils::build_api_resource(CAPI_CLUSTER_API_VERSION, "Cluster");
    let api: Api<DynamicObject> = Api::namespaced_with(client, namespace, &ar);
    let patch = serde_json::json!({"spec": {"paused": false}});

    match api
        .patch(cluster_name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => info!(cluster = %cluster_name, "CAPI cluster unpaused"),
        Err(e) => warn!(cluster = %cluster_name, error = %e, "unpause failed (may not exist)"),
    }
    Ok(())
}
