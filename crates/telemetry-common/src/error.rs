//! Error types for the telemetry operator
//!
//! Errors carry the pipeline or resource they relate to so that log lines
//! emitted by the controller runner are actionable without extra context.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for telemetry operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for a LogPipeline spec
    #[error("validation error for {pipeline}: {message}")]
    Validation {
        /// Name of the pipeline with invalid configuration
        pipeline: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "lock", "agent", "status")
        context: String,
    },

    /// Several independent failures reported together
    #[error("{}", join_messages(errors))]
    Joined {
        /// The collected errors, in the order they occurred
        errors: Vec<Error>,
    },
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl Error {
    /// Create a validation error with pipeline context
    pub fn validation_for(pipeline: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            pipeline: pipeline.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Combine errors so all of them are reported.
    ///
    /// Returns `None` for an empty list and the error itself for a single one.
    pub fn join(mut errors: Vec<Error>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Joined { errors }),
        }
    }

    /// Check if this error is retryable
    ///
    /// Conflicts (409) and throttling (429) are retried because another
    /// writer won an optimistic-concurrency race. Other 4xx errors need a
    /// spec or RBAC fix and are not retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 409 || ae.code == 429 => true,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) => false,
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
            Error::Joined { errors } => errors.iter().any(Error::is_retryable),
        }
    }

    /// Get the pipeline name if this error is associated with a specific pipeline
    pub fn pipeline(&self) -> Option<&str> {
        match self {
            Error::Validation { pipeline, .. } => Some(pipeline),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    // ==========================================================================
    // Story Tests: Error Propagation in Pipeline Reconciliation
    // ==========================================================================

    /// Story: Validation errors name the pipeline and are never retried
    #[test]
    fn story_validation_errors_name_the_pipeline() {
        let err = Error::validation_for("foo", "custom filter must define a name");
        assert!(err.to_string().contains("validation error for foo"));
        assert_eq!(err.pipeline(), Some("foo"));
        assert!(!err.is_retryable());
    }

    /// Story: Lock races surface as conflicts and get another attempt
    #[test]
    fn story_conflicts_and_throttling_are_retried() {
        assert!(api_error(409).is_retryable());
        assert!(api_error(429).is_retryable());
        assert!(api_error(500).is_retryable());
        assert!(!api_error(403).is_retryable());
        assert!(!api_error(422).is_retryable());
    }

    /// Story: A failed status write is reported together with the reconcile failure
    #[test]
    fn story_joined_errors_report_every_failure() {
        let joined = Error::join(vec![
            Error::internal_with_context("agent", "daemonset apply failed"),
            Error::internal_with_context("status", "status patch failed"),
        ])
        .unwrap();

        let msg = joined.to_string();
        assert!(msg.contains("daemonset apply failed"));
        assert!(msg.contains("status patch failed"));
        assert!(msg.contains("; "));
        assert!(joined.is_retryable());
    }

    #[test]
    fn join_collapses_trivial_lists() {
        assert!(Error::join(vec![]).is_none());

        let single = Error::join(vec![Error::serialization("bad json")]).unwrap();
        assert!(matches!(single, Error::Serialization { .. }));
    }

    #[test]
    fn joined_errors_are_not_retried_when_none_is_retryable() {
        let joined = Error::join(vec![
            Error::validation_for("a", "x"),
            Error::serialization("y"),
        ])
        .unwrap();
        assert!(!joined.is_retryable());
    }

    #[test]
    fn serde_errors_convert_to_serialization() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { kind: None, .. }));
        assert!(!err.is_retryable());

        let err = Error::serialization_for_kind("ConfigMap", "missing data");
        match err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("ConfigMap")),
            _ => panic!("Expected Serialization variant"),
        }
    }
}
