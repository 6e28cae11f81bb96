//! Component version diffs between two cluster specs
//!
//! The differ asks each registered reporter whether its component changed and
//! collects the answers in registration order. It is a pure function of its
//! two inputs.

use std::fmt::Write;
use std::sync::Arc;

use strata_capi::{ChangeDiffReporter, Provider};
use strata_common::{ClusterSpec, ComponentChangeDiff};

/// Reports Kubernetes version changes
struct KubernetesVersionReporter;

impl ChangeDiffReporter for KubernetesVersionReporter {
    fn change_diff(&self, current: &ClusterSpec, new: &ClusterSpec) -> Option<ComponentChangeDiff> {
        ComponentChangeDiff::between(
            "kubernetes",
            current.kubernetes_version_tag(),
            new.kubernetes_version_tag(),
        )
    }
}

/// Reports bundle release changes
struct BundleNumberReporter;

impl ChangeDiffReporter for BundleNumberReporter {
    fn change_diff(&self, current: &ClusterSpec, new: &ClusterSpec) -> Option<ComponentChangeDiff> {
        ComponentChangeDiff::between(
            "bundle",
            current.bundles_number.to_string(),
            new.bundles_number.to_string(),
        )
    }
}

/// Forwards to a provider's own reporter
struct ProviderReporter(Arc<dyn Provider>);

impl ChangeDiffReporter for ProviderReporter {
    fn change_diff(&self, current: &ClusterSpec, new: &ClusterSpec) -> Option<ComponentChangeDiff> {
        self.0.change_diff(current, new)
    }
}

/// Collects component changes from registered reporters
#[derive(Clone)]
pub struct SpecDiffer {
    reporters: Vec<Arc<dyn ChangeDiffReporter>>,
}

impl Default for SpecDiffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecDiffer {
    /// Differ with the Kubernetes version and bundle reporters registered
    pub fn new() -> Self {
        Self {
            reporters: vec![
                Arc::new(KubernetesVersionReporter),
                Arc::new(BundleNumberReporter),
            ],
        }
    }

    /// Differ that also consults the given provider
    pub fn for_provider(provider: Arc<dyn Provider>) -> Self {
        Self::new().with_reporter(Arc::new(ProviderReporter(provider)))
    }

    /// Register another reporter
    pub fn with_reporter(mut self, reporter: Arc<dyn ChangeDiffReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    /// Non-empty diffs in registration order
    pub fn diff(&self, current: &ClusterSpec, new: &ClusterSpec) -> Vec<ComponentChangeDiff> {
        self.reporters
            .iter()
            .filter_map(|r| r.change_diff(current, new))
            .collect()
    }

    /// Human-readable list of changes, one per line
    pub fn summary(diffs: &[ComponentChangeDiff]) -> String {
        if diffs.is_empty() {
            return "no component changes".to_string();
        }
        let mut out = String::new();
        for diff in diffs {
            let _ = writeln!(out, "  {}", diff);
        }
        out
    }
}
