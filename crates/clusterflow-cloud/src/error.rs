//! Reconciliation error types

use thiserror::Error;

/// Reconciliation errors
///
/// The variants follow how far an error propagates: `NotFound` is absorbed
/// by `find`, field errors abort only the owning task, `Conflict` aborts
/// the run before anything renders, `Transient` is retried inside the
/// provider and everything else is fatal for the task that raised it.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Field is required: {0}")]
    RequiredField(String),

    #[error("Field cannot be changed: {0}")]
    ImmutableField(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Lifecycle violation for {task}: {message}")]
    Lifecycle { task: String, message: String },

    #[error("Dependency not ready: {0}")]
    DependencyNotReady(String),

    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<CloudError>,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Task {task} failed: {source}")]
    Task {
        task: String,
        #[source]
        source: Box<CloudError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn required(field: impl Into<String>) -> Self {
        CloudError::RequiredField(field.into())
    }

    pub fn immutable(field: impl Into<String>) -> Self {
        CloudError::ImmutableField(field.into())
    }

    /// Attach the identity of the failing task, keeping the cause chain.
    pub fn for_task(self, task: impl Into<String>) -> Self {
        match self {
            already @ CloudError::Task { .. } => already,
            other => CloudError::Task {
                task: task.into(),
                source: Box::new(other),
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            CloudError::NotFound(_) => true,
            CloudError::Task { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Transient(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        match self {
            CloudError::PermissionDenied(_) => true,
            CloudError::Task { source, .. } => source.is_permission_denied(),
            _ => false,
        }
    }

    /// The innermost error, skipping task identity and retry wrappers.
    pub fn root_cause(&self) -> &CloudError {
        match self {
            CloudError::Task { source, .. } | CloudError::RetriesExhausted { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_for_task_keeps_cause_chain() {
        let err = CloudError::immutable("zone").for_task("LoadBalancer/api");
        assert_eq!(
            err.to_string(),
            "Task LoadBalancer/api failed: Field cannot be changed: zone"
        );
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "Field cannot be changed: zone");
    }

    #[test]
    fn test_for_task_does_not_double_wrap() {
        let err = CloudError::Cancelled.for_task("a/b").for_task("c/d");
        assert_eq!(err.to_string(), "Task a/b failed: Run cancelled");
    }

    #[test]
    fn test_root_cause() {
        let err = CloudError::RetriesExhausted {
            attempts: 3,
            source: Box::new(CloudError::Transient("503".into())),
        }
        .for_task("Gateway/gw");
        assert!(matches!(err.root_cause(), CloudError::Transient(_)));
        assert!(!err.is_transient());
    }
}
