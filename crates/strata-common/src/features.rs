//! Feature flag cache
//!
//! Optional behaviours (node taints, for one) are gated by boolean flags. The
//! cache is an explicit object owned by the process's dependency graph and
//! shared as `Arc<FeatureFlags>`; workflows for different clusters may consult
//! it concurrently.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

/// Cache key for control-plane and worker taints support
pub const TAINTS_SUPPORT: &str = "taintsSupport";

/// Environment variable that activates taints support
pub const TAINTS_SUPPORT_ENV_VAR: &str = "STRATA_TAINTS_SUPPORT";

/// A named flag with an optional environment variable fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Feature {
    /// Cache key
    pub name: &'static str,
    /// Environment variable consulted when the key was never stored
    pub env_var: Option<&'static str>,
}

/// Taints support feature
pub const fn taints_support() -> Feature {
    Feature {
        name: TAINTS_SUPPORT,
        env_var: Some(TAINTS_SUPPORT_ENV_VAR),
    }
}

/// Concurrency-safe key to bool cache.
///
/// `parking_lot::RwLock` is task-fair: a queued writer blocks new readers, so
/// a steady stream of `load` calls cannot starve `store`.
#[derive(Debug, Default)]
pub struct FeatureFlags {
    cache: RwLock<HashMap<String, bool>>,
}

impl FeatureFlags {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key, returning `(value, present)`.
    ///
    /// Absent keys yield `(false, false)`.
    pub fn load(&self, key: &str) -> (bool, bool) {
        match self.cache.read().get(key) {
            Some(value) => (*value, true),
            None => (false, false),
        }
    }

    /// Store a value, replacing any previous one.
    pub fn store(&self, key: impl Into<String>, value: bool) {
        self.cache.write().insert(key.into(), value);
    }

    /// Whether a feature is active, reading the process environment for
    /// keys that were never stored.
    pub fn is_active(&self, feature: &Feature) -> bool {
        self.is_active_with(feature, |var| std::env::var(var).ok())
    }

    /// Like [`FeatureFlags::is_active`] with an injectable environment lookup.
    ///
    /// The resolved value is cached, so the environment is read at most once
    /// per key.
    pub fn is_active_with<F>(&self, feature: &Feature, lookup: F) -> bool
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let (value, present) = self.load(feature.name);
        if present {
            return value;
        }

        let value = feature
            .env_var
            .and_then(lookup)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        debug!(feature = feature.name, active = value, "resolved feature flag");
        self.store(feature.name, value);
        value
    }

    /// Mark a feature active.
    pub fn enable(&self, feature: &Feature) {
        self.store(feature.name, true);
    }
}
