//! Runtime handles and change records

use std::fmt;
use std::path::{Path, PathBuf};

/// Handle to a live cluster: its name and the kubeconfig used to reach it.
///
/// Created for the bootstrap cluster, the workload cluster and, when it is a
/// different cluster, the management cluster. Owns nothing but the path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cluster {
    /// Cluster name
    pub name: String,
    /// Path to the kubeconfig file
    pub kubeconfig_file: PathBuf,
}

impl Cluster {
    /// Create a handle
    pub fn new(name: impl Into<String>, kubeconfig_file: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kubeconfig_file: kubeconfig_file.into(),
        }
    }

    /// Kubeconfig path, `None` when the handle was built without one
    pub fn kubeconfig(&self) -> Option<&Path> {
        if self.kubeconfig_file.as_os_str().is_empty() {
            None
        } else {
            Some(&self.kubeconfig_file)
        }
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A component's version change between two specs
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ComponentChangeDiff {
    /// Component name (e.g., "docker", "kubernetes")
    pub component_name: String,
    /// Version in the current spec
    pub old_version: String,
    /// Version in the new spec
    pub new_version: String,
}

impl ComponentChangeDiff {
    /// Diff between two versions of a component, `None` when equal
    pub fn between(
        component_name: impl Into<String>,
        old_version: impl Into<String>,
        new_version: impl Into<String>,
    ) -> Option<Self> {
        let (old_version, new_version) = (old_version.into(), new_version.into());
        if old_version == new_version {
            return None;
        }
        Some(Self {
            component_name: component_name.into(),
            old_version,
            new_version,
        })
    }
}

impl fmt::Display for ComponentChangeDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.component_name, self.old_version, self.new_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_between_equal_versions_is_none() {
        assert!(ComponentChangeDiff::between("docker", "v1.6.4", "v1.6.4").is_none());
    }

    #[test]
    fn diff_between_versions_records_both() {
        let diff = ComponentChangeDiff::between("docker", "v0.3.18", "v0.3.19").unwrap();
        assert_eq!(diff.component_name, "docker");
        assert_eq!(diff.old_version, "v0.3.18");
        assert_eq!(diff.new_version, "v0.3.19");
        assert_eq!(diff.to_string(), "docker: v0.3.18 -> v0.3.19");
    }

    #[test]
    fn empty_kubeconfig_path_is_none() {
        assert!(Cluster::new("test", "").kubeconfig().is_none());
        assert_eq!(
            Cluster::new("test", "/tmp/test.kubeconfig").kubeconfig(),
            Some(Path::new("/tmp/test.kubeconfig"))
        );
    }
}
