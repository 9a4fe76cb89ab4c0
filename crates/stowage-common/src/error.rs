//! Error types for the Stowage operator
//!
//! Errors are structured with fields to aid debugging in production. The
//! split that matters to controllers is [`Error::is_retryable`]: infrastructure
//! failures (API server unavailable, job creation, status writes) are handed
//! back to the controller runtime for requeue, while business failures
//! (unresolvable storage, broken archives, unsupported configuration) are
//! recorded in the request's status and never retried.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Stowage operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid request configuration
    #[error("validation error for {request}: {message}")]
    Validation {
        /// Name of the request with invalid configuration
        request: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.sourceRef.namespace")
        field: Option<String>,
    },

    /// No usable BackupStorageLocation could be selected
    #[error("storage location error: {message}")]
    StorageResolution {
        /// Why resolution failed
        message: String,
    },

    /// Blob storage I/O failure
    #[error("storage error [{backend}]: {message}")]
    Storage {
        /// Storage backend (s3, nfs)
        backend: String,
        /// Description of what failed
        message: String,
    },

    /// Archive could not be written or read
    #[error("archive error: {message}")]
    Archive {
        /// Description of what failed
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

    /// A configuration value names something this operator does not support
    #[error("unsupported {what} {value:?}")]
    Unsupported {
        /// What kind of value was rejected (e.g., "sourceRef.kind", "auth method")
        what: String,
        /// The rejected value
        value: String,
    },

    /// Peer cluster credential or connectivity failure
    #[error("remote cluster {cluster}: {message}")]
    RemoteCluster {
        /// Name of the RemoteCluster
        cluster: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "dispatcher", "worker")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            request: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with request context and field path
    pub fn validation_for_field(
        request: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            request: request.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a storage location resolution error
    pub fn storage_resolution(msg: impl Into<String>) -> Self {
        Self::StorageResolution {
            message: msg.into(),
        }
    }

    /// Create a blob storage error for a backend
    pub fn storage(backend: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Storage {
            backend: backend.into(),
            message: msg.into(),
        }
    }

    /// Create an archive error
    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive {
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

    /// Create an error for an unsupported configuration value
    pub fn unsupported(what: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Unsupported {
            what: what.into(),
            value: value.into(),
        }
    }

    /// Create a remote cluster error
    pub fn remote_cluster(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RemoteCluster {
            cluster: cluster.into(),
            message: msg.into(),
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

    /// Check if this error is retryable
    ///
    /// Kubernetes transport and 5xx errors are retryable; 4xx responses are not.
    /// Everything that describes the request's own configuration or its
    /// artifacts is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::StorageResolution { .. } => false,
            Error::Storage { .. } => false,
            Error::Archive { .. } => false,
            Error::Serialization { .. } => false,
            Error::Unsupported { .. } => false,
            Error::RemoteCluster { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// True when the API server answered 404
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// True when the API server answered 409 AlreadyExists
    ///
    /// A 409 Conflict from a stale resourceVersion does not count.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409 && ae.reason == "AlreadyExists",
            _ => false,
        }
    }

    /// HTTP status code of an API error, if this is one
    pub fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> Error {
    Error::from(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: How failures surface on requests
    // ==========================================================================
    //
    // Business failures end up as the free-text message of a Failed request,
    // so their Display output is what users read. Infrastructure failures are
    // retried by the controller runtime and must report is_retryable().

    /// Story: A backup without a usable storage location fails with a clear message
    #[test]
    fn story_storage_resolution_message_reaches_status() {
        let err = Error::storage_resolution("no default BackupStorageLocation set");
        assert_eq!(
            err.to_string(),
            "storage location error: no default BackupStorageLocation set"
        );
        assert!(!err.is_retryable());
    }

    /// Story: Only AlreadyExists counts as an existing object, not every 409
    #[test]
    fn story_conflict_is_not_already_exists() {
        assert!(api_error(409, "AlreadyExists").is_already_exists());

        let conflict = api_error(409, "Conflict");
        assert!(!conflict.is_already_exists());
        assert_eq!(conflict.api_code(), Some(409));

        assert!(!api_error(404, "NotFound").is_already_exists());
        assert!(!Error::internal("boom").is_already_exists());
    }

    /// Story: Storage I/O failures name the backend
    #[test]
    fn story_storage_io_errors_name_backend() {
        let err = Error::storage("s3", "bucket backups not found");
        assert!(err.to_string().contains("[s3]"));
        assert!(err.to_string().contains("bucket backups not found"));
        assert!(!err.is_retryable());

        let err = Error::storage("nfs", "No such file or directory");
        assert!(err.to_string().contains("[nfs]"));
    }

    /// Story: Unsupported configuration is permanent and names the bad value
    #[test]
    fn story_unsupported_configuration_is_permanent() {
        let err = Error::unsupported("sourceRef.kind", "Snapshot");
        assert_eq!(err.to_string(), "unsupported sourceRef.kind \"Snapshot\"");
        assert!(!err.is_retryable());

        let err = Error::unsupported("auth method", "OIDC");
        assert!(err.to_string().contains("auth method"));
    }

    /// Story: Validation errors carry the request and field
    #[test]
    fn story_validation_errors_include_field() {
        let err = Error::validation_for_field(
            "nightly-restore",
            "spec.sourceRef.namespace",
            "sourceRef.namespace is required for Backup",
        );
        match &err {
            Error::Validation { request, field, .. } => {
                assert_eq!(request, "nightly-restore");
                assert_eq!(field.as_deref(), Some("spec.sourceRef.namespace"));
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    /// Story: API conflicts and missing objects are recognised by code
    #[test]
    fn story_api_status_codes_are_classified() {
        let conflict = api_error(409, "AlreadyExists");
        assert!(conflict.is_already_exists());
        assert!(!conflict.is_not_found());
        assert!(!conflict.is_retryable());

        let missing = api_error(404, "NotFound");
        assert!(missing.is_not_found());
        assert_eq!(missing.api_code(), Some(404));

        let unavailable = api_error(503, "ServiceUnavailable");
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn test_internal_error_with_context() {
        let err = Error::internal_with_context("dispatcher", "job has no status");
        assert!(err.is_retryable());
        assert_eq!(err.context(), Some("dispatcher"));
        assert!(err.to_string().contains("[dispatcher]"));
    }

    #[test]
    fn test_internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));
    }

    #[test]
    fn test_non_api_errors_have_no_code() {
        assert_eq!(Error::archive("truncated gzip stream").api_code(), None);
        assert_eq!(Error::serialization("bad yaml").api_code(), None);
        assert!(!Error::serialization_for_kind("Deployment", "bad").is_retryable());
        assert!(!Error::remote_cluster("dr-site", "token key not found in secret").is_retryable());
    }
}
