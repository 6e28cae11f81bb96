//! Kubeconfig file conventions and rewrites

use std::path::{Path, PathBuf};

use serde_yaml::Value;

use crate::{Error, Result};

/// Kubeconfig path for a cluster under `base`: `<base>/<name>/<name>-eks-a-cluster.kubeconfig`
pub fn kubeconfig_path(base: &Path, cluster_name: &str) -> PathBuf {
    base.join(cluster_name)
        .join(format!("{}-eks-a-cluster.kubeconfig", cluster_name))
}

/// Cluster config path for a cluster name: `<name>/<name>-eks-a-cluster.yaml`
pub fn cluster_config_path(cluster_name: &str) -> PathBuf {
    PathBuf::from(cluster_name).join(format!("{}-eks-a-cluster.yaml", cluster_name))
}

/// Point every cluster entry at a loopback-mapped API server port.
///
/// The serving certificate was issued for the node's internal address, so
/// the CA data is dropped and TLS verification disabled for the mapped one.
pub fn rewrite_for_loopback(content: &str, port: &str) -> Result<String> {
    let mut config: Value = serde_yaml::from_str(content)
        .map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string()))?;
    let server = format!("https://127.0.0.1:{}", port);

    let clusters = config
        .get_mut("clusters")
        .and_then(|c| c.as_sequence_mut())
        .ok_or_else(|| {
            Error::serialization_for_kind("Kubeconfig", "kubeconfig has no clusters entry")
        })?;

    for entry in clusters {
        if let Some(Value::Mapping(cluster)) = entry.get_mut("cluster") {
            cluster.remove("certificate-authority-data");
            cluster.insert(
                Value::String("insecure-skip-tls-verify".to_string()),
                Value::Bool(true),
            );
            cluster.insert(Value::String("server".to_string()), Value::String(server.clone()));
        }
    }

    serde_yaml::to_string(&config)
        .map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string()))
}

/// Write a kubeconfig, creating parent directories
pub fn write_kubeconfig(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::internal_with_context(
                "kubeconfig",
                format!("failed to create {}: {}", parent.display(), e),
            )
        })?;
    }
    std::fs::write(path, content).map_err(|e| {
        Error::internal_with_context(
            "kubeconfig",
            format!("failed to write {}: {}", path.display(), e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &str = r#"
apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: LS0tLS1CRUdJTiBDRVJUSUZJ
    server: https://172.18.0.3:6443
  name: capi-quickstart
"#;

    #[test]
    fn loopback_rewrite_replaces_server_and_drops_ca() {
        let out = rewrite_for_loopback(INPUT, "4332").unwrap();
        let value: Value = serde_yaml::from_str(&out).unwrap();
        let cluster = &value["clusters"][0]["cluster"];

        assert_eq!(cluster["server"].as_str(), Some("https://127.0.0.1:4332"));
        assert_eq!(cluster["insecure-skip-tls-verify"].as_bool(), Some(true));
        assert!(cluster.get("certificate-authority-data").is_none());
        assert_eq!(value["clusters"][0]["name"].as_str(), Some("capi-quickstart"));
        assert!(!out.contains("172.18.0.3"));
    }

    #[test]
    fn loopback_rewrite_rejects_config_without_clusters() {
        let err = rewrite_for_loopback("apiVersion: v1\n", "4332").unwrap_err();
        assert!(err.to_string().contains("no clusters"));
    }

    #[test]
    fn conventional_paths() {
        assert_eq!(
            cluster_config_path("dev"),
            PathBuf::from("dev/dev-eks-a-cluster.yaml")
        );
        assert_eq!(
            kubeconfig_path(Path::new("/work"), "dev"),
            PathBuf::from("/work/dev/dev-eks-a-cluster.kubeconfig")
        );
    }

    #[test]
    fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = kubeconfig_path(dir.path(), "dev");
        write_kubeconfig(&path, "apiVersion: v1\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "apiVersion: v1\n");
    }
}
