//! Resolved CLI configuration
//!
//! Built once per invocation from the command-line arguments and passed by
//! reference to the command. Resolution rules:
//!
//! - the cluster config comes from `-f`, or from `<name>/<name>-eks-a-cluster.yaml`
//!   under the work directory when only a cluster name is given;
//! - kubeconfigs come from `--kubeconfig` (and `--w-config` for the cluster
//!   itself), falling back to `<name>/<name>-eks-a-cluster.kubeconfig` under
//!   the work directory.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use strata_cluster::TaskContext;
use strata_common::bundle::Bundles;
use strata_common::kubeconfig::{cluster_config_path, kubeconfig_path};
use strata_common::{Cluster, ClusterSpec};

use crate::commands::ClusterArgs;
use crate::{Error, Result};

/// Configuration of one CLI invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrataConfig {
    /// Directory holding per-cluster folders
    pub work_dir: PathBuf,
    /// Cluster config file
    pub cluster_config: PathBuf,
    /// Management cluster kubeconfig, or the cluster's own when self-managed
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig of the cluster itself
    pub workload_kubeconfig: Option<PathBuf>,
    /// Versions bundle replacing the embedded one
    pub bundles_override: Option<PathBuf>,
}

impl StrataConfig {
    /// Resolve arguments into a configuration
    pub fn from_args(args: &ClusterArgs) -> Result<Self> {
        let cluster_config = resolve_cluster_config(
            &args.work_dir,
            args.cluster_name.as_deref(),
            args.filename.as_deref(),
        )?;
        debug!(config = %cluster_config.display(), "resolved cluster config");
        Ok(Self {
            work_dir: args.work_dir.clone(),
            cluster_config,
            kubeconfig: args.kubeconfig.clone(),
            workload_kubeconfig: args.w_config.clone(),
            bundles_override: args.bundles_override.clone(),
        })
    }

    /// Versions bundle release in effect
    pub fn bundles(&self) -> Result<Bundles> {
        let bundles = match &self.bundles_override {
            Some(path) => Bundles::from_file(path)?,
            None => Bundles::embedded()?,
        };
        Ok(bundles)
    }

    /// Parse the cluster config against `bundles`
    pub fn load_spec(&self, bundles: &Bundles) -> Result<ClusterSpec> {
        Ok(ClusterSpec::load(&self.cluster_config, bundles)?)
    }

    /// Workflow context for `spec`.
    ///
    /// A cluster managed by another gets that cluster's kubeconfig attached.
    /// When `existing` is set the cluster is expected to be running, so a
    /// self-managed cluster must have its own kubeconfig.
    pub fn task_context(
        &self,
        spec: ClusterSpec,
        existing: bool,
        cancel: CancellationToken,
    ) -> Result<TaskContext> {
        if !spec.cluster.is_self_managed() {
            let management = spec.cluster.managed_by().to_string();
            let path = self.existing_kubeconfig(self.kubeconfig.as_deref(), &management)?;
            let spec = spec.with_management_cluster(Cluster::new(management, path));
            return Ok(TaskContext::new(spec, cancel));
        }

        let ctx = TaskContext::new(spec, cancel);
        if !existing {
            return Ok(ctx);
        }
        let name = ctx.spec.name().to_string();
        let explicit = self.workload_kubeconfig.as_deref().or(self.kubeconfig.as_deref());
        let path = self.existing_kubeconfig(explicit, &name)?;
        Ok(ctx.with_workload_kubeconfig(path))
    }

    fn existing_kubeconfig(&self, explicit: Option<&Path>, cluster_name: &str) -> Result<PathBuf> {
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| kubeconfig_path(&self.work_dir, cluster_name));
        if !path.is_file() {
            return Err(Error::validation(format!(
                "KubeConfig doesn't exists for cluster {}",
                cluster_name
            )));
        }
        Ok(path)
    }
}

fn resolve_cluster_config(
    work_dir: &Path,
    cluster_name: Option<&str>,
    filename: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(file) = filename {
        if !file.is_file() {
            return Err(Error::validation(format!(
                "the cluster config file {} does not exist",
                file.display()
            )));
        }
        return Ok(file.to_path_buf());
    }

    let name = cluster_name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::validation("please provide either a valid <cluster-name> or -f <config-file>"))?;
    let path = work_dir.join(cluster_config_path(name));
    if !path.is_file() {
        return Err(Error::validation(format!(
            "clusterconfig file {} for cluster: {} not found, please provide the clusterconfig path manually using -f <config-file>",
            path.display(),
            name
        )));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
apiVersion: strata.dev/v1alpha1
kind: StrataCluster
metadata:
  name: dev
spec:
  kubernetesVersion: "1.29"
  controlPlaneConfiguration:
    count: 1
  workerNodeGroupConfigurations:
    - count: 1
  datacenterRef:
    kind: DockerDatacenterConfig
    name: dev
"#;

    fn args(work_dir: &Path) -> ClusterArgs {
        ClusterArgs {
            cluster_name: None,
            filename: None,
            kubeconfig: None,
            w_config: None,
            bundles_override: None,
            work_dir: work_dir.to_path_buf(),
        }
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn missing_name_and_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = StrataConfig::from_args(&args(dir.path())).unwrap_err();
        assert_eq!(
            err.to_string(),
            "please provide either a valid <cluster-name> or -f <config-file>"
        );
    }

    #[test]
    fn name_without_conventional_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(dir.path());
        args.cluster_name = Some("dev".to_string());

        let err = StrataConfig::from_args(&args).unwrap_err().to_string();
        assert!(err.contains("dev/dev-eks-a-cluster.yaml for cluster: dev not found"));
        assert!(err.contains("please provide the clusterconfig path manually using -f <config-file>"));
    }

    #[test]
    fn name_resolves_conventional_path() {
        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().join("dev/dev-eks-a-cluster.yaml");
        write(&expected, CONFIG);
        let mut args = args(dir.path());
        args.cluster_name = Some("dev".to_string());

        let config = StrataConfig::from_args(&args).unwrap();
        assert_eq!(config.cluster_config, expected);
        let spec = config.load_spec(&config.bundles().unwrap()).unwrap();
        assert_eq!(spec.name(), "dev");
    }

    #[test]
    fn explicit_file_wins_over_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("custom.yaml");
        write(&file, CONFIG);
        let mut args = args(dir.path());
        args.cluster_name = Some("ignored".to_string());
        args.filename = Some(file.clone());

        assert_eq!(StrataConfig::from_args(&args).unwrap().cluster_config, file);
    }

    #[test]
    fn existing_self_managed_cluster_needs_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("dev.yaml");
        write(&file, CONFIG);
        let mut args = args(dir.path());
        args.filename = Some(file);
        let config = StrataConfig::from_args(&args).unwrap();
        let spec = config.load_spec(&config.bundles().unwrap()).unwrap();

        let err = config
            .task_context(spec.clone(), true, CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "KubeConfig doesn't exists for cluster dev");

        assert!(config
            .task_context(spec.clone(), false, CancellationToken::new())
            .is_ok());

        let kubeconfig = kubeconfig_path(dir.path(), "dev");
        write(&kubeconfig, "apiVersion: v1\n");
        let ctx = config.task_context(spec, true, CancellationToken::new()).unwrap();
        assert_eq!(ctx.workload_kubeconfig, Some(kubeconfig));
    }

    #[test]
    fn managed_cluster_gets_management_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("dev.yaml");
        write(
            &file,
            &format!("{}  managementCluster:\n    name: mgmt\n", CONFIG),
        );
        let mgmt_kubeconfig = dir.path().join("mgmt.kubeconfig");
        write(&mgmt_kubeconfig, "apiVersion: v1\n");

        let mut args = args(dir.path());
        args.filename = Some(file);
        args.kubeconfig = Some(mgmt_kubeconfig.clone());
        let config = StrataConfig::from_args(&args).unwrap();
        let spec = config.load_spec(&config.bundles().unwrap()).unwrap();

        let ctx = config.task_context(spec, false, CancellationToken::new()).unwrap();
        let management = ctx.spec.management_cluster.unwrap();
        assert_eq!(management.name, "mgmt");
        assert_eq!(management.kubeconfig_file, mgmt_kubeconfig);
    }
}
