//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{message}")]
    Validation { message: String },

    #[error("failed to {operation} cluster: {source}")]
    Workflow {
        operation: &'static str,
        #[source]
        source: strata_common::Error,
    },

    #[error(transparent)]
    Strata(#[from] strata_common::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    /// Wrap a failed lifecycle operation ("create", "upgrade", "delete")
    pub fn workflow(operation: &'static str, source: strata_common::Error) -> Self {
        Error::Workflow { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_failures_name_the_operation() {
        let err = Error::workflow(
            "upgrade",
            strata_common::Error::timeout("version convergence", "condition not met"),
        );
        assert_eq!(
            err.to_string(),
            "failed to upgrade cluster: timed out waiting for version convergence: condition not met"
        );
    }

    #[test]
    fn nested_workflow_failure_renders_as_message_chain() {
        let inner = strata_common::Error::workflow(
            "create",
            "create bootstrap cluster",
            "dev",
            strata_common::Error::execution("dev-strata-bootstrap", "kind export kubeconfig", "no such cluster"),
        );
        let message = Error::workflow("create", inner).to_string();
        assert!(message.starts_with("failed to create cluster: create workflow failed at task create bootstrap cluster"));
        assert!(message.ends_with("kind export kubeconfig failed for dev-strata-bootstrap: no such cluster"));
        assert!(!message.contains("retryable"));
    }
}
