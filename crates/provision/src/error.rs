//! Error types for the provisioning engine.
//!
//! Errors are split by phase: declaration errors abort before any
//! provisioning starts, provider errors carry a retryability category,
//! and state errors cover the durable state file. A run that provisions
//! some resources and fails others is *not* an `Err` - it is a
//! [`RunSummary`](crate::executor::RunSummary) with per-resource outcomes.

use thiserror::Error;

/// Errors in the declaration set itself. Always fatal before execution.
#[derive(Debug, Error)]
pub enum DeclarationError {
    /// Two resources share a logical name
    #[error("duplicate resource name: {name}")]
    DuplicateName { name: String },

    /// A reference points at a resource that is not declared
    #[error("resource {resource} references undeclared resource {target}")]
    DanglingReference { resource: String, target: String },

    /// The dependency graph contains a cycle
    #[error("dependency cycle: {}", members.join(" -> "))]
    Cycle { members: Vec<String> },
}

/// Errors surfaced by provider adapters.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rate limiting or similar backpressure (transient, retryable)
    #[error("provider throttled: {message}")]
    Throttled { message: String },

    /// The provider call exceeded its bounded wait (retryable)
    #[error("provider call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Remote object already exists or changed unexpectedly
    #[error("conflict on {resource_type} {identifier}: {message}")]
    Conflict {
        resource_type: String,
        identifier: String,
        message: String,
    },

    /// Malformed or rejected input attributes
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// No remote object with the given identifier
    #[error("not found: {id}")]
    NotFound { id: String },

    /// No provider registered for the resource type
    #[error("no provider for resource type: {resource_type}")]
    UnknownType { resource_type: String },

    /// Other/unknown errors
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::Timeout { .. })
    }
}

/// Errors around the durable state file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Another run holds the state lock
    #[error("state is locked by another run: {holder}")]
    Locked { holder: String },

    /// The state file changed on disk since it was loaded
    #[error("state serial mismatch: loaded {loaded}, found {found} on disk")]
    SerialMismatch { loaded: u64, found: u64 },
}

/// Umbrella error for engine operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    /// Malformed input attribute on a single resource
    #[error("validation failed for {resource}: {message}")]
    Validation { resource: String, message: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    State(#[from] StateError),

    /// Deletion was requested for a resource marked protect
    #[error("resource {name} is protected and cannot be deleted")]
    Protected { name: String },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_categories() {
        assert!(
            ProviderError::Throttled {
                message: "rate exceeded".into()
            }
            .is_retryable()
        );
        assert!(ProviderError::Timeout { seconds: 30 }.is_retryable());
        assert!(
            !ProviderError::Conflict {
                resource_type: "aws:s3/bucket".into(),
                identifier: "b-1".into(),
                message: "exists".into()
            }
            .is_retryable()
        );
        assert!(
            !ProviderError::InvalidInput {
                message: "bad cidr".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn cycle_display_names_members() {
        let err = DeclarationError::Cycle {
            members: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }
}
