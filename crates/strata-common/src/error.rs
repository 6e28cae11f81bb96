//! Error types for Strata lifecycle operations
//!
//! Errors carry the cluster, task or operation they relate to so a failed run
//! can be traced back to the stage that broke without reading debug logs.
//! The variants follow the failure taxonomy the workflows act on:
//! validation failures abort before anything is mutated, execution failures
//! are retried at the call site, and timeouts or cancellations are fatal.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Strata operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A precondition failed before any mutating action ran
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.controlPlaneConfiguration.endpoint")
        field: Option<String>,
    },

    /// An infrastructure-facing call failed
    #[error("{operation} failed for {cluster}: {message}")]
    Execution {
        /// Name of the cluster the call targeted
        cluster: String,
        /// Operation that failed (e.g., "apply", "clusterctl move")
        operation: String,
        /// Description of what failed
        message: String,
        /// Whether a retry at the call site may succeed
        retryable: bool,
    },

    /// A convergence wait exceeded its ceiling
    #[error("timed out waiting for {operation}: {message}")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// Description of the state that was never reached
        message: String,
    },

    /// The run was cancelled by an external signal
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation in progress when the signal arrived
        operation: String,
    },

    /// Infrastructure provider error
    #[error("provider error [{provider}] for {cluster}: {message}")]
    Provider {
        /// Name of the cluster being provisioned
        cluster: String,
        /// Provider name (docker, vsphere, aws)
        provider: String,
        /// Description of what failed
        message: String,
    },

    /// Cluster API object migration between clusters did not complete
    #[error("move error for {cluster}: {message}")]
    Move {
        /// Name of the cluster being moved
        cluster: String,
        /// Description of what failed
        message: String,
        /// Object kinds that could not be confirmed on the target
        missing_kinds: Vec<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being serialized (if known)
        kind: Option<String>,
    },

    /// A workflow task failed; wraps the task's error untouched
    #[error("{workflow} workflow failed at task {task} for {cluster}: {source}")]
    Workflow {
        /// Workflow name (create, upgrade, delete)
        workflow: String,
        /// Task that returned the error
        task: String,
        /// Target cluster of the run
        cluster: String,
        /// The original error
        #[source]
        source: Box<Error>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client", "kubeconfig")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    ///
    /// For simple validation errors without cluster context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context
    pub fn validation_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context and field path
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a retryable execution error
    pub fn execution(
        cluster: impl Into<String>,
        operation: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Execution {
            cluster: cluster.into(),
            operation: operation.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create an execution error that retrying will not fix
    pub fn execution_permanent(
        cluster: impl Into<String>,
        operation: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Execution {
            cluster: cluster.into(),
            operation: operation.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a convergence timeout error
    pub fn timeout(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a provider error with full context
    pub fn provider_for(
        cluster: impl Into<String>,
        provider: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provider {
            cluster: cluster.into(),
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a provider error with the given message
    pub fn provider(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::provider_for(UNKNOWN_CONTEXT, provider, msg)
    }

    /// Create a move error listing the kinds missing on the target
    pub fn move_failed(
        cluster: impl Into<String>,
        msg: impl Into<String>,
        missing_kinds: Vec<String>,
    ) -> Self {
        Self::Move {
            cluster: cluster.into(),
            message: msg.into(),
            missing_kinds,
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific document kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Wrap a task error with the workflow stage it came from
    pub fn workflow(
        workflow: impl Into<String>,
        task: impl Into<String>,
        cluster: impl Into<String>,
        source: Error,
    ) -> Self {
        Self::Workflow {
            workflow: workflow.into(),
            task: task.into(),
            cluster: cluster.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Create an internal error without context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::internal_with_context(UNKNOWN_CONTEXT, msg)
    }

    /// Check if this error may succeed when the same call is retried
    ///
    /// Only execution failures and transport-level kube errors qualify.
    /// Validation, timeout and cancellation are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Execution { retryable, .. } => *retryable,
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => ae.code >= 500 || ae.code == 429,
                _ => true,
            },
            _ => false,
        }
    }

    /// Returns true for precondition failures
    pub fn is_validation(&self) -> bool {
        matches!(self.root_cause(), Error::Validation { .. })
    }

    /// Returns true for convergence timeouts and cancellations
    pub fn is_timeout_or_cancelled(&self) -> bool {
        matches!(
            self.root_cause(),
            Error::Timeout { .. } | Error::Cancelled { .. }
        )
    }

    /// The error a task originally returned, unwrapping workflow context
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Workflow { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
