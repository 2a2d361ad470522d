//! Scaleway provider error types

use clusterflow_cloud::CloudError;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScwError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Scaleway API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected API response: {0}")]
    InvalidResponse(String),

    #[error("Operation not supported for {kind}: {operation}")]
    Unsupported {
        kind: &'static str,
        operation: &'static str,
    },

    #[error("Invalid zone: {0}")]
    InvalidZone(String),

    #[error("Invalid cluster spec: {0}")]
    InvalidSpec(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

impl ScwError {
    pub fn api(status: StatusCode, message: impl Into<String>) -> Self {
        ScwError::Api {
            status: status.as_u16(),
            message: message.into(),
        }
    }
}

/// Classify provider failures into the engine's taxonomy.
///
/// 404 is NotFound, 401/403 PermissionDenied, 409 Conflict, 429, 5xx and
/// connection failures are Transient, every other 4xx is a fatal API error.
impl From<ScwError> for CloudError {
    fn from(err: ScwError) -> Self {
        match err {
            ScwError::Api { status, message } => match status {
                404 => CloudError::NotFound(message),
                401 | 403 => CloudError::PermissionDenied(message),
                409 => CloudError::Conflict(message),
                429 | 500..=599 => CloudError::Transient(format!("{}: {}", status, message)),
                _ => CloudError::ApiError(format!("{}: {}", status, message)),
            },
            ScwError::Http(e) if e.is_connect() || e.is_timeout() => {
                CloudError::Transient(e.to_string())
            }
            ScwError::Http(e) => CloudError::ApiError(e.to_string()),
            ScwError::Cloud(e) => e,
            ScwError::Io(e) => CloudError::Io(e),
            ScwError::Json(e) => CloudError::Json(e),
            ScwError::InvalidZone(_) | ScwError::InvalidSpec(_) | ScwError::Yaml(_) => {
                CloudError::InvalidConfig(err.to_string())
            }
            other => CloudError::ApiError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScwError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(status: u16) -> CloudError {
        ScwError::Api {
            status,
            message: "boom".into(),
        }
        .into()
    }

    #[test]
    fn test_status_classification() {
        assert!(classify(404).is_not_found());
        assert!(classify(403).is_permission_denied());
        assert!(classify(401).is_permission_denied());
        assert!(matches!(classify(409), CloudError::Conflict(_)));
        assert!(classify(429).is_transient());
        assert!(classify(503).is_transient());
        assert!(matches!(classify(400), CloudError::ApiError(_)));
    }

    #[test]
    fn test_spec_errors_are_config_errors() {
        let err: CloudError = ScwError::InvalidSpec("no groups".into()).into();
        assert!(matches!(err, CloudError::InvalidConfig(m) if m.contains("no groups")));
    }
}
